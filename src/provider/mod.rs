//! Fix sources.
//!
//! A [`FixProvider`] pushes [`ProviderEvent`]s into the channel handed to
//! [`FixProvider::subscribe`] until [`FixProvider::unsubscribe`] is called.
//! Providers run their own background task; the tracker only owns the
//! receiving end.

pub mod gnss;
pub mod replay;

use std::future::Future;

use tokio::sync::mpsc;

use crate::fix::GeoFix;

pub use gnss::ModemFixProvider;
pub use replay::ReplayFixProvider;

/// Something a provider reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProviderEvent {
    /// A new position.
    Fix(GeoFix),
    /// Coarse usability of the location source (`false` = no fix obtainable).
    Availability(bool),
}

/// A push-based source of location fixes.
pub trait FixProvider: Send + Sync + 'static {
    /// Start delivering events into `events`. Replaces any previous subscription.
    fn subscribe(&self, events: mpsc::Sender<ProviderEvent>) -> Result<(), String>;

    /// Stop delivering events and release the source. Resolves once the
    /// background task is gone. No-op when not subscribed.
    fn unsubscribe(&self) -> impl Future<Output = ()> + Send;
}
