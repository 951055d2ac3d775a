mod resolve;
mod step;
mod validate;

pub use resolve::{resolve, Resolved, ResolvedParams};
pub use step::{ParamValue, Placeholder, Plan, PlanBuilder, Step};
pub use validate::{validate, validate_str};
