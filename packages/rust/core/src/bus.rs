//! Live progress broadcasting.
//!
//! [`ProgressBus`] fans crawl events out to any number of subscribers over a
//! `tokio::sync::broadcast` channel and keeps a folded per-site snapshot so
//! a late subscriber can catch up. Snapshot fold and broadcast happen under
//! one lock, so every subscriber observes a site's events in publish order.

use std::collections::BTreeMap;
use std::sync::Mutex;

use tokio::sync::broadcast;
use tracing::debug;

use docrag_shared::{CrawlEvent, Site, SiteId, SiteStatus};

/// Default broadcast channel capacity; slow subscribers that fall further
/// behind than this see `RecvError::Lagged` and should resubscribe.
pub const DEFAULT_CAPACITY: usize = 256;

/// Broadcast hub for crawl progress events.
pub struct ProgressBus {
    snapshot: Mutex<BTreeMap<SiteId, Site>>,
    sender: broadcast::Sender<CrawlEvent>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            snapshot: Mutex::new(BTreeMap::new()),
            sender,
        }
    }

    /// Publish one event: fold it into the snapshot, then broadcast.
    pub fn publish(&self, event: CrawlEvent) {
        let mut snapshot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        fold(&mut snapshot, &event);
        // No receivers is fine; the snapshot still advances.
        let _ = self.sender.send(event);
    }

    /// Subscribe to the live feed.
    ///
    /// Returns a catch-up burst (one `SiteAdded` per known site, in site-id
    /// order, carrying the latest snapshot) plus the live receiver. Events
    /// published after this call are guaranteed to reach the receiver.
    pub fn subscribe(&self) -> (Vec<CrawlEvent>, broadcast::Receiver<CrawlEvent>) {
        let snapshot = self.snapshot.lock().unwrap_or_else(|e| e.into_inner());
        let receiver = self.sender.subscribe();
        let burst = snapshot
            .values()
            .cloned()
            .map(|site| CrawlEvent::SiteAdded { site })
            .collect();
        (burst, receiver)
    }

    /// Number of sites currently in the snapshot.
    pub fn site_count(&self) -> usize {
        self.snapshot.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// Apply an event to the latest-state-per-site map.
fn fold(snapshot: &mut BTreeMap<SiteId, Site>, event: &CrawlEvent) {
    match event {
        CrawlEvent::SiteAdded { site } => {
            snapshot.insert(site.id, site.clone());
        }
        CrawlEvent::CrawlProgress {
            site_id,
            progress,
            current_url,
            chunks_added,
        } => {
            if let Some(site) = snapshot.get_mut(site_id) {
                site.status = SiteStatus::Crawling;
                site.progress = site.progress.max(*progress);
                site.chunks_added = site.chunks_added.max(*chunks_added);
                if current_url.is_some() {
                    site.current_url = current_url.clone();
                }
            } else {
                debug!(%site_id, "progress for unknown site dropped from snapshot");
            }
        }
        CrawlEvent::CrawlCompleted {
            site_id,
            total_chunks,
        } => {
            if let Some(site) = snapshot.get_mut(site_id) {
                site.status = SiteStatus::Completed;
                site.progress = 100.0;
                site.chunks_added = *total_chunks;
                site.total_chunks = Some(*total_chunks);
                site.current_url = None;
            }
        }
        CrawlEvent::CrawlError { site_id, error } => {
            if let Some(site) = snapshot.get_mut(site_id) {
                site.status = SiteStatus::Error;
                site.error = Some(error.clone());
                site.current_url = None;
            }
        }
        CrawlEvent::SiteDeleted { site_id } => {
            snapshot.remove(site_id);
        }
        CrawlEvent::DatabaseCleared => {
            snapshot.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(site_id: SiteId, progress: f32, chunks: u64) -> CrawlEvent {
        CrawlEvent::CrawlProgress {
            site_id,
            progress,
            current_url: Some("https://docs.example.com/p".into()),
            chunks_added: chunks,
        }
    }

    #[tokio::test]
    async fn subscribers_see_events_in_publish_order() {
        let bus = ProgressBus::default();
        let site = Site::new("https://docs.example.com", "docs");
        let (_, mut rx) = bus.subscribe();

        bus.publish(CrawlEvent::SiteAdded { site: site.clone() });
        bus.publish(progress(site.id, 50.0, 3));
        bus.publish(CrawlEvent::CrawlCompleted {
            site_id: site.id,
            total_chunks: 7,
        });

        assert!(matches!(rx.recv().await.unwrap(), CrawlEvent::SiteAdded { .. }));
        assert!(matches!(
            rx.recv().await.unwrap(),
            CrawlEvent::CrawlProgress { .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            CrawlEvent::CrawlCompleted { total_chunks: 7, .. }
        ));
    }

    #[tokio::test]
    async fn late_subscriber_gets_snapshot_burst() {
        let bus = ProgressBus::default();
        let a = Site::new("https://a.example.com", "a");
        let b = Site::new("https://b.example.com", "b");

        bus.publish(CrawlEvent::SiteAdded { site: a.clone() });
        bus.publish(CrawlEvent::SiteAdded { site: b.clone() });
        bus.publish(progress(a.id, 40.0, 2));

        let (burst, _rx) = bus.subscribe();
        assert_eq!(burst.len(), 2);

        // Site ids are time-sortable, so burst order matches creation order.
        let CrawlEvent::SiteAdded { site: first } = &burst[0] else {
            panic!("expected SiteAdded");
        };
        assert_eq!(first.id, a.id);
        assert_eq!(first.progress, 40.0);
        assert_eq!(first.chunks_added, 2);
    }

    #[tokio::test]
    async fn progress_is_monotonic_in_snapshot() {
        let bus = ProgressBus::default();
        let site = Site::new("https://docs.example.com", "docs");
        bus.publish(CrawlEvent::SiteAdded { site: site.clone() });
        bus.publish(progress(site.id, 60.0, 4));
        bus.publish(progress(site.id, 30.0, 2)); // stale, must not regress

        let (burst, _) = bus.subscribe();
        let CrawlEvent::SiteAdded { site } = &burst[0] else {
            panic!("expected SiteAdded");
        };
        assert_eq!(site.progress, 60.0);
        assert_eq!(site.chunks_added, 4);
    }

    #[tokio::test]
    async fn deleted_and_cleared_sites_leave_the_snapshot() {
        let bus = ProgressBus::default();
        let a = Site::new("https://a.example.com", "a");
        let b = Site::new("https://b.example.com", "b");
        bus.publish(CrawlEvent::SiteAdded { site: a.clone() });
        bus.publish(CrawlEvent::SiteAdded { site: b.clone() });

        bus.publish(CrawlEvent::SiteDeleted { site_id: a.id });
        assert_eq!(bus.site_count(), 1);

        bus.publish(CrawlEvent::DatabaseCleared);
        assert_eq!(bus.site_count(), 0);
    }

    #[tokio::test]
    async fn error_event_records_message() {
        let bus = ProgressBus::default();
        let site = Site::new("https://docs.example.com", "docs");
        bus.publish(CrawlEvent::SiteAdded { site: site.clone() });
        bus.publish(CrawlEvent::CrawlError {
            site_id: site.id,
            error: "root unreachable".into(),
        });

        let (burst, _) = bus.subscribe();
        let CrawlEvent::SiteAdded { site } = &burst[0] else {
            panic!("expected SiteAdded");
        };
        assert_eq!(site.status, SiteStatus::Error);
        assert_eq!(site.error.as_deref(), Some("root unreachable"));
    }
}
