pub mod flow_limiter;
pub mod pass_through;
pub mod scale;
pub mod string_join;
pub mod string_source;

pub use flow_limiter::FlowLimiterCalculator;
pub use pass_through::PassThroughCalculator;
pub use scale::ScaleCalculator;
pub use string_join::StringJoinCalculator;
pub use string_source::StringSourceCalculator;
