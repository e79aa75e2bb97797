// THEORY:
// The `search` module runs several subjects at once. A household might be looking
// for two pets, or a pet and a set of keys; every subject needs its own matcher,
// because a matcher's motion baseline and lighting memory belong to one fingerprint.
//
// Each subject is an actor: a tokio task that exclusively owns one
// `RealtimeMatcher` and receives messages over a bounded channel. A frame is copied
// once into an `Arc<Frame>` and the same allocation is shared with every actor.
// Replies come back over `oneshot` channels and are gathered with `join_all`, so the
// per-frame latency is the slowest subject rather than the sum of all of them.
//
// No locks are involved: the only shared data is the immutable frame.

use crate::core_modules::fingerprint::VisualFingerprint;
use crate::core_modules::frame::{Frame, FrameView};
use crate::error::{VisionError, VisionResult};
use crate::matcher::{MatchResult, MatcherSettings, MatcherStats, RealtimeMatcher};
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SUBJECT_QUEUE_SIZE: usize = 4;

/// Message type for subject actors.
enum SubjectMessage {
    Process(Arc<Frame>, oneshot::Sender<(Option<MatchResult>, bool)>),
    UpdateSettings(MatcherSettings),
    Reset,
    Stats(oneshot::Sender<MatcherStats>),
    Shutdown,
}

struct SubjectWorker {
    id: String,
    name: String,
    sender: mpsc::Sender<SubjectMessage>,
    handle: JoinHandle<()>,
}

/// One subject's outcome for one frame.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectReport {
    pub subject_id: String,
    pub subject_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<MatchResult>,
    pub should_alert: bool,
}

/// Fans frames out to one dedicated matcher per subject.
pub struct MultiSubjectSearch {
    settings: MatcherSettings,
    workers: Vec<SubjectWorker>,
}

impl MultiSubjectSearch {
    pub fn new(settings: MatcherSettings) -> Self {
        Self {
            settings,
            workers: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn subject_ids(&self) -> impl Iterator<Item = &str> {
        self.workers.iter().map(|w| w.id.as_str())
    }

    /// Spawns an actor for `fingerprint` and returns its subject id.
    ///
    /// Must be called from within a tokio runtime. Adding a fingerprint whose id is
    /// already searched replaces the old actor.
    pub fn add_subject(&mut self, fingerprint: VisualFingerprint) -> String {
        let id = fingerprint.id.clone();
        let name = fingerprint.name.clone();
        self.remove_subject(&id);

        let (sender, mut receiver) = mpsc::channel::<SubjectMessage>(SUBJECT_QUEUE_SIZE);
        let settings = self.settings.clone();
        let handle = tokio::spawn(async move {
            let mut matcher = RealtimeMatcher::with_fingerprint(settings, fingerprint);
            while let Some(message) = receiver.recv().await {
                match message {
                    SubjectMessage::Process(frame, reply) => {
                        let result = matcher.process_frame(&frame.view());
                        let _ = reply.send((result, matcher.should_alert()));
                    }
                    SubjectMessage::UpdateSettings(settings) => matcher.update_settings(settings),
                    SubjectMessage::Reset => matcher.reset(),
                    SubjectMessage::Stats(reply) => {
                        let _ = reply.send(matcher.stats());
                    }
                    SubjectMessage::Shutdown => break,
                }
            }
        });

        info!(subject_id = %id, subject = %name, "Started subject worker");
        self.workers.push(SubjectWorker {
            id: id.clone(),
            name,
            sender,
            handle,
        });
        id
    }

    /// Stops and forgets a subject. Returns whether it was being searched.
    pub fn remove_subject(&mut self, id: &str) -> bool {
        let Some(index) = self.workers.iter().position(|w| w.id == id) else {
            return false;
        };
        let worker = self.workers.remove(index);
        if worker.sender.try_send(SubjectMessage::Shutdown).is_err() {
            worker.handle.abort();
        }
        debug!(subject_id = %id, "Removed subject worker");
        true
    }

    /// Runs every subject's matcher on `frame` and gathers their reports in subject order.
    pub async fn process_frame(&self, frame: &FrameView<'_>) -> VisionResult<Vec<SubjectReport>> {
        let shared = Arc::new(frame.to_frame());

        let pending = self.workers.iter().map(|worker| {
            let shared = Arc::clone(&shared);
            async move {
                let (reply, response) = oneshot::channel();
                worker
                    .sender
                    .send(SubjectMessage::Process(shared, reply))
                    .await
                    .map_err(|_| VisionError::worker_unavailable(&worker.id))?;
                let (result, should_alert) = response
                    .await
                    .map_err(|_| VisionError::worker_unavailable(&worker.id))?;
                Ok::<_, VisionError>(SubjectReport {
                    subject_id: worker.id.clone(),
                    subject_name: worker.name.clone(),
                    result,
                    should_alert,
                })
            }
        });

        join_all(pending).await.into_iter().collect()
    }

    /// Pushes new settings to every subject.
    pub async fn update_settings(&mut self, settings: MatcherSettings) -> VisionResult<()> {
        self.settings = settings.clone();
        for worker in &self.workers {
            worker
                .sender
                .send(SubjectMessage::UpdateSettings(settings.clone()))
                .await
                .map_err(|_| VisionError::worker_unavailable(&worker.id))?;
        }
        Ok(())
    }

    /// Resets every subject's rolling state.
    pub async fn reset(&self) -> VisionResult<()> {
        for worker in &self.workers {
            worker
                .sender
                .send(SubjectMessage::Reset)
                .await
                .map_err(|_| VisionError::worker_unavailable(&worker.id))?;
        }
        Ok(())
    }

    /// Statistics of one subject's matcher.
    pub async fn stats(&self, id: &str) -> VisionResult<MatcherStats> {
        let worker = self
            .workers
            .iter()
            .find(|w| w.id == id)
            .ok_or_else(|| VisionError::worker_unavailable(id))?;
        let (reply, response) = oneshot::channel();
        worker
            .sender
            .send(SubjectMessage::Stats(reply))
            .await
            .map_err(|_| VisionError::worker_unavailable(id))?;
        response
            .await
            .map_err(|_| VisionError::worker_unavailable(id))
    }

    /// Stops every actor and waits for them to exit.
    pub async fn shutdown(&mut self) {
        for worker in self.workers.drain(..) {
            let _ = worker.sender.send(SubjectMessage::Shutdown).await;
            if let Err(e) = worker.handle.await {
                warn!(subject_id = %worker.id, error = %e, "Subject worker did not exit cleanly");
            }
        }
    }
}

impl Drop for MultiSubjectSearch {
    fn drop(&mut self) {
        // Best effort shutdown on drop
        for worker in &self.workers {
            let _ = worker.sender.try_send(SubjectMessage::Shutdown);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::fingerprint::{FingerprintOptions, generate_fingerprint_from_frame};
    use crate::core_modules::frame::PixelRect;

    fn fingerprint(name: &str, rgba: [u8; 4]) -> VisualFingerprint {
        let reference = Frame::filled(64, 64, rgba);
        generate_fingerprint_from_frame(&reference.view(), name, &FingerprintOptions::default())
            .expect("fingerprint")
    }

    #[tokio::test]
    async fn each_subject_is_matched_independently() {
        let mut search = MultiSubjectSearch::new(MatcherSettings::default());
        let orange = search.add_subject(fingerprint("orange", [255, 165, 0, 255]));
        let blue = search.add_subject(fingerprint("blue", [0, 0, 255, 255]));
        assert_eq!(search.len(), 2);

        let baseline = Frame::filled(100, 100, [128, 128, 128, 255]);
        let first = search.process_frame(&baseline.view()).await.unwrap();
        assert!(first.iter().all(|r| r.result.is_none()));

        let mut frame = baseline.clone();
        frame.fill_rect(PixelRect::new(0, 0, 50, 50), [255, 165, 0, 255]);
        let reports = search.process_frame(&frame.view()).await.unwrap();

        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].subject_id, orange);
        assert_eq!(reports[1].subject_id, blue);
        let orange_match = reports[0].result.as_ref().expect("orange match");
        assert!(reports[0].should_alert);
        let region = orange_match.region.expect("region");
        assert_eq!((region.x, region.y), (0, 0));
        let blue_confidence = reports[1].result.as_ref().map_or(0.0, |r| r.confidence);
        assert!(orange_match.confidence > blue_confidence);

        let stats = search.stats(&orange).await.unwrap();
        assert_eq!(stats.frames_processed, 2);
        assert_eq!(stats.matches_found, 1);

        search.shutdown().await;
        assert!(search.is_empty());
    }

    #[tokio::test]
    async fn removed_subjects_stop_reporting() {
        let mut search = MultiSubjectSearch::new(MatcherSettings::default());
        let id = search.add_subject(fingerprint("orange", [255, 165, 0, 255]));
        assert!(search.remove_subject(&id));
        assert!(!search.remove_subject(&id));

        let frame = Frame::filled(16, 16, [0, 0, 0, 255]);
        let reports = search.process_frame(&frame.view()).await.unwrap();
        assert!(reports.is_empty());
        assert!(search.stats(&id).await.is_err());
    }
}
