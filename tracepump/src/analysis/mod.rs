//! Analysis engine: schemas, routing and event decoding
//!
//! The engine owns everything one trace session declares (dispatches,
//! routes, channels, the session clock) and mutates it only from the thread
//! that calls [`AnalysisEngine::on_data`].

pub mod analyzer;
pub mod dispatch;
pub mod engine;
pub mod event;
pub mod routing;
pub mod session;

pub use analyzer::Analyzer;
pub use dispatch::{parse_new_event, Dispatch, DispatchBuilder, DispatchTable, Field};
pub use engine::{AnalysisEngine, EngineStats, EngineStatus};
pub use event::{
    ArrayReader, AuxSpan, EventContext, EventData, EventTypeInfo, FieldInfo, FieldValue, Scalar,
};
pub use routing::{BeginContext, Route, RouteTable};
pub use session::{Channel, ChannelTable, SessionContext};
