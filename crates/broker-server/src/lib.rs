//! Broker Service (module E): the gRPC front door clients submit
//! queries to and poll for status/results from.

pub mod error;
pub mod server;

pub use server::JobServiceImpl;
