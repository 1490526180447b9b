//! Editor-side command/resource execution core.
//!
//! The other end of the router: buffers partial JSON with the shared
//! framing rules, dispatches parsed envelopes to the editor's command and
//! resource registries, and marshals execution onto the editor's single UI
//! thread with a bounded wait.
//!
//! Two front-ends share the dispatcher:
//! - [`EditorBridgeClient`] dials the bridge's hub, registers an identity,
//!   and serves routed requests.
//! - [`EditorControlServer`] listens for control connections, keeping at
//!   most one at a time.

mod dispatch;
pub mod main_thread;
mod registry;
mod server;
pub mod demo;

pub use dispatch::Dispatcher;
pub use main_thread::{MainThreadQueue, MAIN_THREAD_TIMEOUT_MESSAGE};
pub use registry::{EditorCommandHandler, EditorRegistry, EditorResourceHandler};
pub use server::{EditorBridgeClient, EditorControlServer};
