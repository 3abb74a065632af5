//! Metric naming and properties for MTConnect data items.
//!
//! A metric name is the component path of the data item followed by the
//! title-cased concatenation of its composition type, sub-type, type and
//! name (or id), e.g. `Axes-1/Linear-X/MotorTemperatureXtemp`.

use mtc_spb_common::{MetricValue, PropertySet};

use crate::model::{Component, Container, DataItem};

/// Upper-case the first character and lower-case the rest (ASCII only).
///
/// Word separators get no special treatment: `PATH_FEEDRATE` becomes
/// `Path_feedrate`.
pub fn title_case(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => {
            let mut out = String::with_capacity(s.len());
            out.push(first.to_ascii_uppercase());
            out.push_str(&chars.as_str().to_ascii_lowercase());
            out
        }
        None => String::new(),
    }
}

/// Extend a component path with `"{type}-{id}"` for `component`.
pub fn component_path(parent: &str, component: &Component) -> String {
    join_path(parent, &format!("{}-{}", component.type_name, component.id))
}

pub(crate) fn join_path(path: &str, leaf: &str) -> String {
    if path.is_empty() {
        leaf.to_string()
    } else {
        format!("{}/{}", path, leaf)
    }
}

/// Type of the composition `item` references within `owner`.
///
/// Empty unless the reference resolves to exactly one composition with a type.
pub fn resolve_composition_type(owner: &dyn Container, item: &DataItem) -> String {
    let Some(composition_id) = item.composition_id.as_deref() else {
        return String::new();
    };

    let mut matches = owner
        .compositions()
        .iter()
        .filter(|c| c.id.as_deref() == Some(composition_id));

    match (matches.next(), matches.next()) {
        (Some(composition), None) => composition.type_name.clone().unwrap_or_default(),
        _ => String::new(),
    }
}

/// Resolve the metric name of `item`, owned by `owner`, under component `path`.
pub fn resolve_name(path: &str, owner: &dyn Container, item: &DataItem) -> String {
    let composition_type = resolve_composition_type(owner, item);

    let leaf = [
        composition_type.as_str(),
        item.sub_type.as_deref().unwrap_or_default(),
        item.type_name.as_str(),
        item.display_name(),
    ]
    .iter()
    .map(|part| title_case(part))
    .collect::<String>();

    join_path(path, &leaf)
}

/// Attribute properties published with every metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricProperties {
    pub read_only: bool,
    pub can_write: bool,
    pub id: String,
    pub name: Option<String>,
    pub type_name: String,
    pub sub_type: Option<String>,
    pub native_units: Option<String>,
    pub units: Option<String>,
    pub composition_id: Option<String>,
}

impl MetricProperties {
    /// Render as an ordered Sparkplug property set.
    ///
    /// `MTC.CompositionId` is only present when the data item has one.
    pub fn to_property_set(&self) -> PropertySet {
        let mut set = PropertySet::new()
            .with("ReadOnly", self.read_only)
            .with("CanWrite", self.can_write)
            .with("MTC.Id", self.id.as_str())
            .with("MTC.Name", optional(&self.name))
            .with("MTC.Type", self.type_name.as_str())
            .with("MTC.SubType", optional(&self.sub_type))
            .with("MTC.NativeUnits", optional(&self.native_units))
            .with("MTC.Units", optional(&self.units));

        if let Some(composition_id) = &self.composition_id {
            set.push("MTC.CompositionId", composition_id.as_str());
        }

        set
    }
}

impl From<&MetricProperties> for PropertySet {
    fn from(props: &MetricProperties) -> Self {
        props.to_property_set()
    }
}

fn optional(value: &Option<String>) -> MetricValue {
    match value {
        Some(v) => MetricValue::String(v.clone()),
        None => MetricValue::Null,
    }
}

/// Build the metric properties of a data item. MTConnect data is read-only.
pub fn resolve_properties(item: &DataItem) -> MetricProperties {
    MetricProperties {
        read_only: true,
        can_write: false,
        id: item.id.clone(),
        name: item.name.clone(),
        type_name: item.type_name.clone(),
        sub_type: item.sub_type.clone(),
        native_units: item.native_units.clone(),
        units: item.units.clone(),
        composition_id: item.composition_id.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::PROBE;
    use crate::model::{Category, Composition, Device, Snapshot};

    fn linear(snapshot: &Snapshot) -> &Component {
        &snapshot.devices().next().unwrap().components[0].components[0]
    }

    #[test]
    fn test_title_case() {
        assert_eq!(title_case("AVAILABILITY"), "Availability");
        assert_eq!(title_case("xPOS"), "Xpos");
        assert_eq!(title_case("a"), "A");
        assert_eq!(title_case(""), "");
        // Only the first character is upper-cased, even after `_` or `-`.
        assert_eq!(title_case("PATH_FEEDRATE"), "Path_feedrate");
        assert_eq!(title_case("x-AXIS"), "X-axis");
    }

    #[test]
    fn test_component_path() {
        let snapshot = Snapshot::parse_probe(PROBE).unwrap();
        let device = snapshot.devices().next().unwrap();
        let axes = &device.components[0];

        let path = component_path("", axes);
        assert_eq!(path, "Axes-1");
        assert_eq!(component_path(&path, &axes.components[0]), "Axes-1/Linear-X");
    }

    #[test]
    fn test_resolve_name_with_composition() {
        let snapshot = Snapshot::parse_probe(PROBE).unwrap();
        let linear = linear(&snapshot);
        let temp = &linear.data_items[1];

        assert_eq!(resolve_composition_type(linear, temp), "MOTOR");
        assert_eq!(
            resolve_name("Axes-1/Linear-X", linear, temp),
            "Axes-1/Linear-X/MotorTemperatureXtemp"
        );
    }

    #[test]
    fn test_resolve_name_with_sub_type() {
        let snapshot = Snapshot::parse_probe(PROBE).unwrap();
        let linear = linear(&snapshot);
        let pos = &linear.data_items[0];

        let name = resolve_name("Axes-1/Linear-X", linear, pos);
        assert!(name.starts_with("Axes-1/Linear-X/"));
        assert_eq!(name, "Axes-1/Linear-X/ActualPositionXpos");

        // Deterministic.
        assert_eq!(name, resolve_name("Axes-1/Linear-X", linear, pos));
    }

    #[test]
    fn test_resolve_name_top_level() {
        let device = Device::parse(
            r#"<Device id="d"><DataItems><DataItem id="avail" name="avail" category="EVENT" type="AVAILABILITY"/></DataItems></Device>"#,
        )
        .unwrap();
        assert_eq!(
            resolve_name("", &device, &device.data_items[0]),
            "AvailabilityAvail"
        );
    }

    #[test]
    fn test_missing_name_and_id() {
        let item = DataItem::new("", Category::Event, "AVAILABILITY");
        let device = Device::parse(r#"<Device id="d"/>"#).unwrap();
        assert_eq!(resolve_name("Linear-X", &device, &item), "Linear-X/Availability");
    }

    #[test]
    fn test_composition_failures_degrade_to_empty() {
        let mut item = DataItem::new("t", Category::Sample, "TEMPERATURE");
        let mut device = Device::parse(r#"<Device id="d"/>"#).unwrap();

        // No compositionId.
        assert_eq!(resolve_composition_type(&device, &item), "");

        // Unknown composition.
        item.composition_id = Some("motor".to_string());
        assert_eq!(resolve_composition_type(&device, &item), "");

        // Composition without type.
        device.compositions.push(Composition {
            id: Some("motor".to_string()),
            type_name: None,
        });
        assert_eq!(resolve_composition_type(&device, &item), "");

        // Ambiguous id.
        device.compositions.push(Composition {
            id: Some("motor".to_string()),
            type_name: Some("MOTOR".to_string()),
        });
        assert_eq!(resolve_composition_type(&device, &item), "");
        assert_eq!(resolve_name("", &device, &item), "TemperatureT");
    }

    #[test]
    fn test_properties_order() {
        let snapshot = Snapshot::parse_probe(PROBE).unwrap();
        let linear = linear(&snapshot);

        let set = resolve_properties(&linear.data_items[1]).to_property_set();
        let keys: Vec<_> = set.iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                "ReadOnly",
                "CanWrite",
                "MTC.Id",
                "MTC.Name",
                "MTC.Type",
                "MTC.SubType",
                "MTC.NativeUnits",
                "MTC.Units",
                "MTC.CompositionId",
            ]
        );
        assert_eq!(set.get("ReadOnly"), Some(&MetricValue::Boolean(true)));
        assert_eq!(set.get("CanWrite"), Some(&MetricValue::Boolean(false)));
        assert_eq!(set.get("MTC.Units"), Some(&MetricValue::from("CELSIUS")));
        assert_eq!(set.get("MTC.SubType"), Some(&MetricValue::Null));
        assert_eq!(set.get("MTC.CompositionId"), Some(&MetricValue::from("Xmotor")));

        let set = PropertySet::from(&resolve_properties(&linear.data_items[0]));
        assert_eq!(set.len(), 8);
        assert!(set.get("MTC.CompositionId").is_none());
    }
}
