//! The control-interface trait boundary (§6.5): a streaming collaborator
//! attaches here to register a client, request data starting at a
//! `(file, gtid)` position, and receive drain/checkpoint notifications. No
//! transport is implemented — a future line-oriented collaborator (parsing
//! `REGISTER`/`REQUEST-DATA` commands) plugs into this trait in-process.
//!
//! Grounded on the producer/consumer split the teacher's `instance/mod.rs`
//! documents between the event-loop task and attached listeners, here made
//! explicit as a trait instead of the teacher's direct channel wiring.

use uuid::Uuid;

use crate::avro::reader::AvroReader;
use crate::binlog::gtid::Gtid;
use crate::error::ConverterError;

/// A handle returned by [`ControlSurface::attach`], identifying one
/// streaming collaborator for the lifetime of its subscription. Carries the
/// same UUID a line-oriented transport collaborator would present in its
/// `REGISTER UUID=...` command, so the core's notion of "this client" lines
/// up with the wire-level registration identifier without translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientHandle(pub Uuid);

/// Hooks the converter drives on an attached client; implemented by
/// whatever transport a collaborator brings (a socket, an in-process
/// channel, a test double).
pub trait ClientCallbacks: Send {
    /// Called whenever the producer flushes new data a client might be
    /// waiting on — the client decides whether to act on it.
    fn on_drain_available(&self, handle: ClientHandle);

    /// Called once per converter checkpoint, after the state file and all
    /// open `AvroTable`s have been made durable.
    fn on_checkpoint(&self, handle: ClientHandle, gtid: Gtid);
}

/// The core's side of the collaborator contract: attach/detach a client and
/// resolve a `REQUEST-DATA <file-stem> [<gtid>]` request into a positioned
/// [`AvroReader`].
pub trait ControlSurface {
    /// Registers a new client and returns its handle.
    fn attach(&mut self, callbacks: Box<dyn ClientCallbacks>) -> ClientHandle;

    /// Removes a previously attached client; a no-op if already detached.
    fn detach(&mut self, handle: ClientHandle);

    /// Opens the Avro file for `table_file_stem` (e.g. `shop.t.000002`) and
    /// returns a reader positioned at its first record — callers scan
    /// forward themselves to the first record whose `GTID` is ≥
    /// `from_gtid`, since the container format has no GTID index.
    fn request_data(
        &self,
        table_file_stem: &str,
        from_gtid: Option<Gtid>,
    ) -> Result<AvroReader, ConverterError>;
}
