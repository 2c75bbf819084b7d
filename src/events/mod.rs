//! # Events Module
//!
//! Progress reporting for sync runs.
//!
//! The pipeline emits events through a channel so that any front end (CLI,
//! GUI, a host application) can follow a run without the core knowing
//! about it.
//!
//! ## Example
//! ```rust,ignore
//! let (sender, receiver) = EventChannel::new();
//!
//! std::thread::spawn(move || {
//!     for event in receiver.iter() {
//!         match event {
//!             Event::Pipeline(PipelineEvent::Progress(p)) => println!("{}/{}", p.completed, p.total),
//!             Event::Stage(StageEvent::Reused { file_id, stage }) => println!("{file_id}: reused {stage}"),
//!             _ => {}
//!         }
//!     }
//! });
//!
//! let context = SyncContext::builder().events(sender) /* ... */ .build()?;
//! ```

mod channel;
mod types;

pub use channel::{null_sender, EventChannel, EventReceiver, EventSender};
pub use types::*;
