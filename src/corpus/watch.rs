//! Filesystem notifications for an [`FsCorpus`]

use super::{Corpus, FileEvent, FsCorpus};
use crate::error::Result;
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::time::Duration;
use tokio::sync::mpsc;

/// Watches a corpus root and reports changes to tracked documents
pub struct FsWatcher {
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<FileEvent>,
}

impl FsWatcher {
    /// Start watching `corpus`. `poll_interval` applies to polling backends.
    pub fn start(corpus: &FsCorpus, poll_interval: Duration) -> Result<Self> {
        let (sender, events) = mpsc::unbounded_channel();
        let filter = corpus.clone();

        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    for change in translate(&filter, &event) {
                        if sender.send(change).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => tracing::warn!("Watch error: {}", e),
            },
            Config::default().with_poll_interval(poll_interval),
        )?;
        watcher.watch(corpus.root(), RecursiveMode::Recursive)?;

        Ok(Self {
            _watcher: watcher,
            events,
        })
    }

    /// Next change, or `None` once the watcher stops
    pub async fn next(&mut self) -> Option<FileEvent> {
        self.events.recv().await
    }
}

/// Map a notify event onto document events for tracked paths
pub fn translate(corpus: &FsCorpus, event: &Event) -> Vec<FileEvent> {
    let tracked: Vec<String> = event
        .paths
        .iter()
        .filter_map(|p| corpus.relative(p))
        .filter(|p| corpus.tracks(p))
        .collect();

    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            let relative: Vec<Option<String>> =
                event.paths.iter().map(|p| corpus.relative(p)).collect();
            match relative.as_slice() {
                [Some(from), Some(to)] if corpus.tracks(from) && corpus.tracks(to) => {
                    vec![FileEvent::Renamed {
                        from: from.clone(),
                        to: to.clone(),
                    }]
                }
                [Some(from), _] if corpus.tracks(from) => vec![FileEvent::Deleted(from.clone())],
                [_, Some(to)] if corpus.tracks(to) => vec![FileEvent::Created(to.clone())],
                _ => Vec::new(),
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) | EventKind::Remove(_) => {
            tracked.into_iter().map(FileEvent::Deleted).collect()
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) | EventKind::Create(_) => {
            tracked.into_iter().map(FileEvent::Created).collect()
        }
        EventKind::Modify(_) => tracked.into_iter().map(FileEvent::Modified).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, RemoveKind};
    use std::path::PathBuf;

    fn corpus() -> FsCorpus {
        FsCorpus::new("/notes", "md", vec!["drafts/**".to_string()])
    }

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        let mut event = Event::new(kind);
        for path in paths {
            event = event.add_path(PathBuf::from(path));
        }
        event
    }

    #[test]
    fn test_translate_basic_kinds() {
        let corpus = corpus();

        let created = event(EventKind::Create(CreateKind::File), &["/notes/a.md"]);
        assert_eq!(translate(&corpus, &created), vec![FileEvent::Created("a.md".into())]);

        let modified = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/notes/sub/b.md"],
        );
        assert_eq!(
            translate(&corpus, &modified),
            vec![FileEvent::Modified("sub/b.md".into())]
        );

        let removed = event(EventKind::Remove(RemoveKind::File), &["/notes/a.md"]);
        assert_eq!(translate(&corpus, &removed), vec![FileEvent::Deleted("a.md".into())]);
    }

    #[test]
    fn test_translate_filters_untracked() {
        let corpus = corpus();
        let ignored = event(
            EventKind::Create(CreateKind::File),
            &["/notes/drafts/x.md", "/notes/y.txt", "/elsewhere/z.md"],
        );
        assert!(translate(&corpus, &ignored).is_empty());
    }

    #[test]
    fn test_translate_rename() {
        let corpus = corpus();
        let both = EventKind::Modify(ModifyKind::Name(RenameMode::Both));

        let renamed = event(both, &["/notes/a.md", "/notes/b.md"]);
        assert_eq!(
            translate(&corpus, &renamed),
            vec![FileEvent::Renamed {
                from: "a.md".into(),
                to: "b.md".into()
            }]
        );

        let to_untracked = event(both, &["/notes/a.md", "/notes/a.txt"]);
        assert_eq!(
            translate(&corpus, &to_untracked),
            vec![FileEvent::Deleted("a.md".into())]
        );
    }
}
