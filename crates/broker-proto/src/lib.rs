//! Generated gRPC protocol definitions for the query broker's JobService.

pub mod job {
    pub mod v1 {
        tonic::include_proto!("broker.job.v1");
    }
}

pub use job::v1::*;
