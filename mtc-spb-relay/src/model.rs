//! MTConnect device model.
//!
//! A [`Snapshot`] is built from one probe document: a header version plus an
//! ordered list of [`Device`]s, each a tree of [`Component`]s carrying
//! [`DataItem`]s. Data items keep a bounded, time-ordered sample history
//! filled from current documents (see [`crate::streams`]).
//!
//! Element and attribute names are matched by local name, so documents are
//! accepted regardless of the MTConnect schema namespace/version.

use std::collections::{HashSet, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use roxmltree::Node;
use thiserror::Error;

/// Default number of samples kept per data item.
pub const DEFAULT_SAMPLE_BUFFER: usize = 100;

/// Version reported when the probe header carries none.
pub const DEFAULT_VERSION: &str = "0.0.0.0";

/// Document parsing errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("Malformed document: {0}")]
    MalformedDocument(String),
}

impl ParseError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedDocument(msg.into())
    }
}

/// Data item lookup errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error("No {category} data item of type {type_name}")]
    NotFound {
        category: Category,
        type_name: String,
    },

    #[error("{count} {category} data items of type {type_name}, expected one")]
    Ambiguous {
        category: Category,
        type_name: String,
        count: usize,
    },

    #[error("Data item '{id}' has no sample yet")]
    NoSampleYet { id: String },
}

/// Data item category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Event,
    Sample,
    Condition,
}

impl Category {
    /// Category as written in MTConnect documents.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Event => "EVENT",
            Category::Sample => "SAMPLE",
            Category::Condition => "CONDITION",
        }
    }

    /// Parse a category attribute value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EVENT" => Some(Category::Event),
            "SAMPLE" => Some(Category::Sample),
            "CONDITION" => Some(Category::Condition),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a data item lookup searches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Scope {
    /// Only the device's direct data items.
    #[default]
    TopLevel,
    /// The whole device tree, in document order.
    Recursive,
}

/// One observed value of a data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    /// Agent sequence number, when reported.
    pub sequence: Option<u64>,
    pub value: String,
}

impl Sample {
    pub fn new(timestamp: DateTime<Utc>, value: impl Into<String>) -> Self {
        Self {
            timestamp,
            sequence: None,
            value: value.into(),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }
}

/// A sub-assembly of a component, referenced by data items via `compositionId`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Composition {
    pub id: Option<String>,
    pub type_name: Option<String>,
}

/// A leaf measurement, event or condition slot.
#[derive(Debug, Clone, PartialEq)]
pub struct DataItem {
    /// Item id; empty when the document omits it.
    pub id: String,
    pub name: Option<String>,
    pub category: Category,
    pub type_name: String,
    pub sub_type: Option<String>,
    pub units: Option<String>,
    pub native_units: Option<String>,
    pub composition_id: Option<String>,
    buffer_size: usize,
    samples: VecDeque<Sample>,
}

impl DataItem {
    /// Create a data item with an empty history.
    pub fn new(id: impl Into<String>, category: Category, type_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            category,
            type_name: type_name.into(),
            sub_type: None,
            units: None,
            native_units: None,
            composition_id: None,
            buffer_size: DEFAULT_SAMPLE_BUFFER,
            samples: VecDeque::new(),
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        while self.samples.len() > self.buffer_size {
            self.samples.pop_front();
        }
        self
    }

    /// Maximum number of samples kept.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Append a sample, evicting the oldest once the buffer is full.
    ///
    /// Samples older than the current sample are rejected and `false` is returned.
    pub fn push_sample(&mut self, sample: Sample) -> bool {
        if let Some(current) = self.samples.back() {
            if sample.timestamp < current.timestamp {
                return false;
            }
        }

        self.samples.push_back(sample);
        while self.samples.len() > self.buffer_size {
            self.samples.pop_front();
        }
        true
    }

    /// The most recent sample.
    pub fn current_sample(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// The sample before the current one.
    pub fn previous_sample(&self) -> Option<&Sample> {
        let len = self.samples.len();
        if len < 2 {
            return None;
        }
        self.samples.get(len - 2)
    }

    /// Sample history, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    /// Name if present and non-empty, otherwise the id.
    pub fn display_name(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => &self.id,
        }
    }

    fn from_node(node: Node<'_, '_>, buffer_size: usize) -> Result<Self, ParseError> {
        let id = node.attribute("id").unwrap_or_default().to_string();

        let category = node
            .attribute("category")
            .and_then(Category::parse)
            .ok_or_else(|| {
                ParseError::malformed(format!(
                    "data item '{}' has a missing or unknown category",
                    id
                ))
            })?;

        let type_name = node
            .attribute("type")
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ParseError::malformed(format!("data item '{}' has no type", id)))?
            .to_string();

        let mut item = DataItem::new(id, category, type_name).with_buffer_size(buffer_size);
        item.name = optional_attr(node, "name");
        item.sub_type = optional_attr(node, "subType");
        item.units = optional_attr(node, "units");
        item.native_units = optional_attr(node, "nativeUnits");
        item.composition_id = optional_attr(node, "compositionId");
        Ok(item)
    }
}

/// Something that owns data items, components and compositions.
pub trait Container {
    fn data_items(&self) -> &[DataItem];
    fn components(&self) -> &[Component];
    fn compositions(&self) -> &[Composition];
}

/// A component of a device.
#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub id: String,
    pub name: Option<String>,
    /// The component element name, e.g. `Linear` or `Axes`.
    pub type_name: String,
    pub data_items: Vec<DataItem>,
    pub components: Vec<Component>,
    pub compositions: Vec<Composition>,
}

impl Component {
    fn from_node(node: Node<'_, '_>, buffer_size: usize) -> Result<Self, ParseError> {
        let type_name = node.tag_name().name().to_string();
        let id = node
            .attribute("id")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ParseError::malformed(format!("{} component has no id", type_name)))?
            .to_string();

        Ok(Self {
            id,
            name: optional_attr(node, "name"),
            type_name,
            data_items: parse_data_items(node, buffer_size)?,
            components: parse_components(node, buffer_size)?,
            compositions: parse_compositions(node),
        })
    }
}

impl Container for Component {
    fn data_items(&self) -> &[DataItem] {
        &self.data_items
    }

    fn components(&self) -> &[Component] {
        &self.components
    }

    fn compositions(&self) -> &[Composition] {
        &self.compositions
    }
}

/// A device (or the agent itself) from a probe document.
#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    /// Device uuid; empty when absent.
    pub uuid: String,
    pub id: String,
    pub name: Option<String>,
    pub description: String,
    pub manufacturer: Option<String>,
    pub serial_number: Option<String>,
    /// Whether this device is the agent (`Agent` element).
    pub is_agent: bool,
    pub data_items: Vec<DataItem>,
    pub components: Vec<Component>,
    pub compositions: Vec<Composition>,
}

impl Device {
    /// Parse a standalone `Device` or `Agent` document.
    pub fn parse(document: &str) -> Result<Self, ParseError> {
        Self::parse_with_buffer(document, DEFAULT_SAMPLE_BUFFER)
    }

    /// Parse with a custom per-item sample buffer size.
    pub fn parse_with_buffer(document: &str, buffer_size: usize) -> Result<Self, ParseError> {
        let doc = roxmltree::Document::parse(document)
            .map_err(|e| ParseError::malformed(e.to_string()))?;
        Self::from_node(doc.root_element(), buffer_size)
    }

    pub(crate) fn from_node(node: Node<'_, '_>, buffer_size: usize) -> Result<Self, ParseError> {
        let tag = node.tag_name().name();
        if tag != "Device" && tag != "Agent" {
            return Err(ParseError::malformed(format!(
                "expected a Device or Agent element, found {}",
                tag
            )));
        }

        let id = node
            .attribute("id")
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ParseError::malformed(format!("{} element has no id", tag)))?
            .to_string();

        let mut device = Self {
            uuid: node.attribute("uuid").unwrap_or_default().to_string(),
            id,
            name: optional_attr(node, "name"),
            description: String::new(),
            manufacturer: None,
            serial_number: None,
            is_agent: tag == "Agent",
            data_items: parse_data_items(node, buffer_size)?,
            components: parse_components(node, buffer_size)?,
            compositions: parse_compositions(node),
        };

        if let Some(desc) = child_element(node, "Description") {
            device.description = desc.text().unwrap_or_default().trim().to_string();
            device.manufacturer = optional_attr(desc, "manufacturer");
            device.serial_number = optional_attr(desc, "serialNumber");
        }

        let mut seen = HashSet::new();
        check_unique_ids(&device.components, &mut seen)?;

        Ok(device)
    }

    /// Find exactly one data item by category and type.
    pub fn get_data_item(
        &self,
        category: Category,
        type_name: &str,
        scope: Scope,
    ) -> Result<&DataItem, LookupError> {
        let matches: Vec<&DataItem> = match scope {
            Scope::TopLevel => self.data_items.iter().collect::<Vec<_>>(),
            Scope::Recursive => self.all_data_items(),
        }
        .into_iter()
        .filter(|item| item.category == category && item.type_name == type_name)
        .collect();

        match matches.as_slice() {
            [item] => Ok(*item),
            [] => Err(LookupError::NotFound {
                category,
                type_name: type_name.to_string(),
            }),
            _ => Err(LookupError::Ambiguous {
                category,
                type_name: type_name.to_string(),
                count: matches.len(),
            }),
        }
    }

    /// Find exactly one top-level event by type.
    pub fn get_event(&self, type_name: &str) -> Result<&DataItem, LookupError> {
        self.get_data_item(Category::Event, type_name, Scope::TopLevel)
    }

    /// Current value of a top-level event.
    pub fn get_event_value(&self, type_name: &str) -> Result<&str, LookupError> {
        let item = self.get_event(type_name)?;
        item.current_sample()
            .map(|s| s.value.as_str())
            .ok_or_else(|| LookupError::NoSampleYet {
                id: item.id.clone(),
            })
    }

    /// Whether a top-level event currently reads `AVAILABLE`.
    ///
    /// An event with no sample yet is not available. Lookup failures propagate.
    pub fn is_event_available(&self, type_name: &str) -> Result<bool, LookupError> {
        match self.get_event_value(type_name) {
            Ok(value) => Ok(value == "AVAILABLE"),
            Err(LookupError::NoSampleYet { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every data item in the device tree, in document order.
    pub fn all_data_items(&self) -> Vec<&DataItem> {
        let mut items = Vec::new();
        collect_data_items(self, &mut items);
        items
    }

    /// Find a data item anywhere in the tree by id.
    pub fn find_data_item_mut(&mut self, id: &str) -> Option<&mut DataItem> {
        if id.is_empty() {
            return None;
        }
        find_in(&mut self.data_items, &mut self.components, id)
    }
}

impl Container for Device {
    fn data_items(&self) -> &[DataItem] {
        &self.data_items
    }

    fn components(&self) -> &[Component] {
        &self.components
    }

    fn compositions(&self) -> &[Composition] {
        &self.compositions
    }
}

/// One polled probe document.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Probe header version, e.g. `1.7.0.3`.
    pub version: String,
    /// Devices and the agent, in document order.
    pub devices: Vec<Device>,
}

impl Snapshot {
    /// Parse an `MTConnectDevices` probe document.
    pub fn parse_probe(document: &str) -> Result<Self, ParseError> {
        Self::parse_probe_with_buffer(document, DEFAULT_SAMPLE_BUFFER)
    }

    /// Parse a probe document with a custom per-item sample buffer size.
    pub fn parse_probe_with_buffer(document: &str, buffer_size: usize) -> Result<Self, ParseError> {
        let doc = roxmltree::Document::parse(document)
            .map_err(|e| ParseError::malformed(e.to_string()))?;
        let root = doc.root_element();

        if root.tag_name().name() != "MTConnectDevices" {
            return Err(ParseError::malformed(format!(
                "expected MTConnectDevices, found {}",
                root.tag_name().name()
            )));
        }

        let version = child_element(root, "Header")
            .and_then(|h| h.attribute("version"))
            .unwrap_or(DEFAULT_VERSION)
            .to_string();

        let devices_node = child_element(root, "Devices")
            .ok_or_else(|| ParseError::malformed("probe document has no Devices element"))?;

        let devices = devices_node
            .children()
            .filter(|n| n.is_element())
            .filter(|n| matches!(n.tag_name().name(), "Device" | "Agent"))
            .map(|n| Device::from_node(n, buffer_size))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { version, devices })
    }

    /// The agent device, if the probe lists one.
    pub fn agent(&self) -> Option<&Device> {
        self.devices.iter().find(|d| d.is_agent)
    }

    /// Devices other than the agent, in document order.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().filter(|d| !d.is_agent)
    }

    /// Find a data item in any device by id.
    pub fn find_data_item_mut(&mut self, id: &str) -> Option<&mut DataItem> {
        self.devices
            .iter_mut()
            .find_map(|device| device.find_data_item_mut(id))
    }
}

fn optional_attr(node: Node<'_, '_>, name: &str) -> Option<String> {
    node.attribute(name).map(str::to_string)
}

fn child_element<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.tag_name().name() == name)
}

fn child_elements<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

fn parse_data_items(node: Node<'_, '_>, buffer_size: usize) -> Result<Vec<DataItem>, ParseError> {
    child_elements(node, "DataItems")
        .flat_map(|list| child_elements(list, "DataItem"))
        .map(|n| DataItem::from_node(n, buffer_size))
        .collect()
}

fn parse_components(node: Node<'_, '_>, buffer_size: usize) -> Result<Vec<Component>, ParseError> {
    child_elements(node, "Components")
        .flat_map(|list| list.children().filter(|n| n.is_element()))
        .map(|n| Component::from_node(n, buffer_size))
        .collect()
}

fn parse_compositions(node: Node<'_, '_>) -> Vec<Composition> {
    child_elements(node, "Compositions")
        .flat_map(|list| child_elements(list, "Composition"))
        .map(|n| Composition {
            id: optional_attr(n, "id"),
            type_name: optional_attr(n, "type"),
        })
        .collect()
}

fn check_unique_ids<'a>(
    components: &'a [Component],
    seen: &mut HashSet<&'a str>,
) -> Result<(), ParseError> {
    for component in components {
        if !seen.insert(&component.id) {
            return Err(ParseError::malformed(format!(
                "duplicate component id '{}'",
                component.id
            )));
        }
        check_unique_ids(&component.components, seen)?;
    }
    Ok(())
}

fn collect_data_items<'a>(container: &'a dyn Container, out: &mut Vec<&'a DataItem>) {
    out.extend(container.data_items());
    for component in container.components() {
        collect_data_items(component, out);
    }
}

fn find_in<'a>(
    items: &'a mut [DataItem],
    components: &'a mut [Component],
    id: &str,
) -> Option<&'a mut DataItem> {
    if let Some(item) = items.iter_mut().find(|item| item.id == id) {
        return Some(item);
    }
    components
        .iter_mut()
        .find_map(|c| find_in(&mut c.data_items, &mut c.components, id))
}
