//! API contract parsing and validation.

pub mod openapi;
pub mod validator;

pub use openapi::{
    looks_like_contract, parse_contract, ContractSpec, Endpoint, SpecType, StructuralProblem,
};
pub use validator::{
    structural_issue, ContractValidation, ContractValidator, HttpProbeValidator,
    DEFAULT_FRAMEWORK, HEALTH_ENDPOINTS,
};
