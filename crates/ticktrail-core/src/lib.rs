//! Telemetry ingestion pipeline and temporal threading engine.
//!
//! Datagrams flow from a UDP socket through a pure decoder into a batch
//! window. Each closed batch is compiled into one idempotent bulk insert
//! and committed by the write orchestrator, which then runs the threading
//! sequence that links new frames, events, and states into chronological
//! chains and maintains each actor's current and initial state pointers.
//!
//! # Modules
//!
//! - [`config`] -- `ticktrail.yaml` loading and validation.
//! - [`decoder`] -- Datagram validation into [`TelemetryEvent`]s.
//! - [`batch`] -- The size/time batch window.
//! - [`graph`] -- Store-agnostic node records.
//! - [`compiler`] -- Batch to bulk-insert compilation.
//! - [`gateway`] -- [`StoreGateway`] contract, mutations, and store errors.
//! - [`threading`] -- Host-side chain planning shared by every store.
//! - [`memory`] -- [`MemoryGraph`], the in-process store.
//! - [`orchestrator`] -- Serialized commits with bounded retry.
//! - [`metrics`] -- Throughput counters.
//! - [`ingress`] -- The UDP receive loop.
//! - [`pipeline`] -- Stage wiring and graceful shutdown.
//! - [`shutdown`] -- The shared stop signal.
//!
//! [`TelemetryEvent`]: ticktrail_types::TelemetryEvent
//! [`StoreGateway`]: gateway::StoreGateway
//! [`MemoryGraph`]: memory::MemoryGraph

pub mod batch;
pub mod compiler;
pub mod config;
pub mod decoder;
pub mod gateway;
pub mod graph;
pub mod ingress;
pub mod memory;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod shutdown;
pub mod threading;
