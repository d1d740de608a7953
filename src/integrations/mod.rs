//! External service integrations.

pub mod model_gateway {
    pub use crate::model_gateway::*;
}

pub mod lead_provider {
    pub use crate::lead_provider::*;
}
