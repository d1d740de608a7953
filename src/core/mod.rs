// Domain-layer modules and shared errors/models
pub mod scoring {
    pub use crate::scoring_service::*;
}

pub mod insights {
    pub use crate::insights::*;
}

pub mod cache {
    pub use crate::score_cache::*;
}

pub mod rate_limiter {
    pub use crate::rate_limiter::*;
}

pub mod statistics {
    pub use crate::statistics::*;
}

pub mod models {
    pub use crate::models::*;
}

pub mod errors {
    pub use crate::errors::*;
}
