//! MTConnect to Sparkplug B relay.
//!
//! Polls an MTConnect agent and republishes its devices as Sparkplug B edge
//! node and device metrics.
//!
//! # Topics
//!
//! ```text
//! spBv1.0/<group>/<NBIRTH|NDATA|NDEATH|NCMD>/<node>
//! spBv1.0/<group>/<DBIRTH|DDATA|DDEATH|DCMD>/<node>/<device>
//! ```
//!
//! Where:
//! - `<group>` - Probe version with non-alphanumerics replaced, e.g. `1_7_0_3`
//! - `<node>` - Agent device id
//! - `<device>` - Device uuid
//!
//! Metric names are the component path of a data item followed by its
//! title-cased composition type, sub-type, type and name, e.g.
//! `Axes-1/Linear-X/MotorTemperatureXtemp`.

pub mod agent;
pub mod config;
pub mod frames;
pub mod liveness;
pub mod model;
pub mod naming;
pub mod phase;
pub mod pipeline;
pub mod poller;
pub mod profile;
pub mod publisher;
pub mod sink;
pub mod streams;
pub mod translator;
