use camino::Utf8PathBuf;
use notify::event::{AccessKind, AccessMode, ModifyKind, RenameMode};
use notify::{Event, EventKind};
use tracing::debug;

/// A notification reduced to what the mirror cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Changed(Utf8PathBuf),
    Removed(Utf8PathBuf),
    /// First half of a move. The matching `MovedTo` may follow.
    MovedFrom {
        path: Utf8PathBuf,
        tracker: Option<usize>,
    },
    MovedTo {
        path: Utf8PathBuf,
        tracker: Option<usize>,
    },
    Renamed {
        from: Utf8PathBuf,
        to: Utf8PathBuf,
        tracker: Option<usize>,
    },
    /// The backend lost events; only a full reconcile can catch up.
    Rescan,
}

pub fn classify(event: &Event) -> Vec<WatchEvent> {
    if event.need_rescan() {
        return vec![WatchEvent::Rescan];
    }

    let tracker = event.tracker();
    let paths: Vec<Utf8PathBuf> = event
        .paths
        .iter()
        .filter_map(|p| match Utf8PathBuf::from_path_buf(p.clone()) {
            Ok(p) => Some(p),
            Err(p) => {
                debug!("Ignoring non UTF-8 path {}", p.display());
                None
            }
        })
        .collect();

    match &event.kind {
        EventKind::Create(_) => paths.into_iter().map(WatchEvent::Changed).collect(),
        EventKind::Remove(_) => paths.into_iter().map(WatchEvent::Removed).collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both => match <[Utf8PathBuf; 2]>::try_from(paths) {
                Ok([from, to]) => vec![WatchEvent::Renamed { from, to, tracker }],
                Err(paths) => paths.into_iter().map(by_existence).collect(),
            },
            RenameMode::From => paths
                .into_iter()
                .map(|path| WatchEvent::MovedFrom { path, tracker })
                .collect(),
            RenameMode::To => paths
                .into_iter()
                .map(|path| WatchEvent::MovedTo { path, tracker })
                .collect(),
            _ => paths.into_iter().map(by_existence).collect(),
        },
        EventKind::Modify(_) => paths.into_iter().map(WatchEvent::Changed).collect(),
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => {
            paths.into_iter().map(WatchEvent::Changed).collect()
        }
        EventKind::Any => paths.into_iter().map(by_existence).collect(),
        _ => Vec::new(),
    }
}

// Backends that cannot say which side of a rename a path is on.
fn by_existence(path: Utf8PathBuf) -> WatchEvent {
    if path.symlink_metadata().is_ok() {
        WatchEvent::Changed(path)
    } else {
        WatchEvent::Removed(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, Flag, RemoveKind};
    use std::path::PathBuf;

    fn ev(kind: EventKind, paths: &[&str]) -> Event {
        let mut e = Event::new(kind);
        for p in paths {
            e = e.add_path(PathBuf::from(p));
        }
        e
    }

    #[test]
    fn create_modify_remove() {
        assert_eq!(
            classify(&ev(EventKind::Create(CreateKind::File), &["/s/a"])),
            vec![WatchEvent::Changed("/s/a".into())]
        );
        assert_eq!(
            classify(&ev(
                EventKind::Modify(ModifyKind::Data(DataChange::Content)),
                &["/s/a"]
            )),
            vec![WatchEvent::Changed("/s/a".into())]
        );
        assert_eq!(
            classify(&ev(EventKind::Remove(RemoveKind::File), &["/s/a"])),
            vec![WatchEvent::Removed("/s/a".into())]
        );
    }

    #[test]
    fn rename_both_carries_both_paths() {
        let e = ev(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/s/old", "/s/new"],
        )
        .set_tracker(7);

        assert_eq!(
            classify(&e),
            vec![WatchEvent::Renamed {
                from: "/s/old".into(),
                to: "/s/new".into(),
                tracker: Some(7),
            }]
        );
    }

    #[test]
    fn rename_halves_keep_tracker() {
        let from = ev(
            EventKind::Modify(ModifyKind::Name(RenameMode::From)),
            &["/s/old"],
        )
        .set_tracker(3);
        assert_eq!(
            classify(&from),
            vec![WatchEvent::MovedFrom {
                path: "/s/old".into(),
                tracker: Some(3),
            }]
        );
    }

    #[test]
    fn rescan_flag_wins() {
        let e = ev(EventKind::Other, &[]).set_flag(Flag::Rescan);
        assert_eq!(classify(&e), vec![WatchEvent::Rescan]);
    }

    #[test]
    fn plain_access_is_ignored() {
        let e = ev(EventKind::Access(AccessKind::Read), &["/s/a"]);
        assert!(classify(&e).is_empty());
    }
}
