mod distributor_service;

pub use distributor_service::*;
