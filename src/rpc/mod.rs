//! Wire bindings for the worker-node gRPC API.
//!
//! `orchestrator` contains hand-maintained prost/tonic bindings for
//! `proto/orchestrator.proto`, checked in so builds do not depend on a protoc
//! toolchain. Keep the module in lockstep with the proto file; the message
//! shapes are the stable contract with the worker fleet.

pub mod orchestrator;
