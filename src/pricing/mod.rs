pub mod oracle;
pub mod overrides;
pub mod pipeline;
pub mod scheduler;

pub use oracle::{CalendarDay, LlmOracle, PricingCalendar, PricingOracle};
pub use overrides::{OverrideEntry, OverrideWrite, UpsertReport};
pub use pipeline::{run_group, run_property, PipelineOutcome};
