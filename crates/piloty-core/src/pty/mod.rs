//! PTY plumbing: the channel that owns the master/child pair, the ingestion
//! ring and worker, and the quiescence collector that turns the stream into
//! request-sized response chunks.

mod channel;
mod collector;
mod ingest;
mod ring;

pub use channel::{signal_from_name, PtyChannel, PtyOpen};
pub use ring::OutputRing;

pub(crate) use collector::{collect, poll};
pub(crate) use ingest::{spawn_ingest, IngestSinks, SessionShared};
