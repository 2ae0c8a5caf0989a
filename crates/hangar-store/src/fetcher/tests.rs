use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use hangar_core::CapabilityId;

use super::*;
use crate::descriptor::{EntryKind, EntrySpec};

/// In-memory repository: directory path -> listing, file path -> bytes.
#[derive(Default)]
struct FakeRepo {
    dirs: HashMap<String, Vec<RemoteEntry>>,
    files: HashMap<String, Vec<u8>>,
    fail_download: Option<String>,
    listed: Mutex<Vec<String>>,
}

impl FakeRepo {
    fn dir(mut self, path: &str, entries: Vec<RemoteEntry>) -> Self {
        self.dirs.insert(path.to_owned(), entries);
        self
    }

    fn file(mut self, path: &str, body: &str) -> Self {
        self.files.insert(path.to_owned(), body.as_bytes().to_vec());
        self
    }

    fn failing(mut self, path: &str) -> Self {
        self.fail_download = Some(path.to_owned());
        self
    }
}

#[async_trait]
impl ContentsSource for FakeRepo {
    async fn list_dir(&self, _repo: &str, _git_ref: &str, path: &str) -> FetchResult<Vec<RemoteEntry>> {
        self.listed.lock().unwrap().push(path.to_owned());
        self.dirs.get(path).cloned().ok_or_else(|| FetchError::Listing {
            path: path.to_owned(),
            message: "404 Not Found".to_owned(),
        })
    }

    async fn download(&self, entry: &RemoteEntry) -> FetchResult<Vec<u8>> {
        if self.fail_download.as_deref() == Some(entry.path.as_str()) {
            return Err(FetchError::Download {
                path: entry.path.clone(),
                message: "connection reset".to_owned(),
            });
        }
        self.files.get(&entry.path).cloned().ok_or_else(|| FetchError::Download {
            path: entry.path.clone(),
            message: "404".to_owned(),
        })
    }
}

fn file(path: &str) -> RemoteEntry {
    RemoteEntry {
        name: path.rsplit('/').next().unwrap().to_owned(),
        entry_type: RemoteEntryType::File,
        path: path.to_owned(),
        download_url: Some(format!("https://raw.example.test/{path}")),
        size: None,
    }
}

fn dir(path: &str) -> RemoteEntry {
    RemoteEntry {
        name: path.rsplit('/').next().unwrap().to_owned(),
        entry_type: RemoteEntryType::Dir,
        path: path.to_owned(),
        download_url: None,
        size: None,
    }
}

fn descriptor(subtree: &str) -> CapabilityDescriptor {
    CapabilityDescriptor {
        id: CapabilityId::from_static("alpha"),
        name: "Alpha".into(),
        description: String::new(),
        source_repo_url: "https://github.com/acme/mcp-store".into(),
        subtree_path: subtree.into(),
        git_ref: None,
        entry: EntrySpec {
            kind: EntryKind::OutOfProcess,
            entry_point: "a.py".into(),
            class_or_command: "python3".into(),
            script_candidates: Vec::new(),
        },
        dependency_manifest_path: None,
        enable_by_default: false,
    }
}

fn alpha_repo() -> FakeRepo {
    FakeRepo::default()
        .dir("servers/alpha", vec![file("servers/alpha/a.py"), dir("servers/alpha/sub")])
        .dir("servers/alpha/sub", vec![file("servers/alpha/sub/b.py")])
        .dir("servers/beta", vec![file("servers/beta/c.py")])
        .file("servers/alpha/a.py", "print('a')")
        .file("servers/alpha/sub/b.py", "print('b')")
        .file("servers/beta/c.py", "print('c')")
}

fn fetcher(repo: FakeRepo) -> (SelectiveFetcher, Arc<FakeRepo>) {
    let repo = Arc::new(repo);
    let source: Arc<dyn ContentsSource> = repo.clone();
    (SelectiveFetcher::new(source, "main", 100), repo)
}

#[tokio::test]
async fn mirrors_only_the_declared_subtree() {
    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("store").join("alpha");
    let (fetcher, repo) = fetcher(alpha_repo());

    let report = fetcher
        .fetch_subtree(&descriptor("servers/alpha"), &dest)
        .await
        .unwrap();

    assert_eq!(report.files, 2);
    assert_eq!(std::fs::read_to_string(dest.join("a.py")).unwrap(), "print('a')");
    assert_eq!(std::fs::read_to_string(dest.join("sub/b.py")).unwrap(), "print('b')");
    assert!(!dest.join("c.py").exists());
    assert!(!tmp.path().join("store").join("servers").exists());

    let listed = repo.listed.lock().unwrap().clone();
    assert_eq!(listed, ["servers/alpha", "servers/alpha/sub"]);
}

#[tokio::test]
async fn refetch_is_a_clean_slate() {
    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("alpha");
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(dest.join("stale.py"), "old").unwrap();

    let (fetcher, _) = fetcher(alpha_repo());
    fetcher
        .fetch_subtree(&descriptor("servers/alpha"), &dest)
        .await
        .unwrap();

    assert!(!dest.join("stale.py").exists());
    assert!(dest.join("a.py").exists());
}

#[tokio::test]
async fn failure_mid_walk_leaves_no_destination() {
    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("alpha");
    std::fs::create_dir_all(&dest).unwrap();
    std::fs::write(dest.join("previous.py"), "old").unwrap();

    let (fetcher, _) = fetcher(alpha_repo().failing("servers/alpha/sub/b.py"));
    let err = fetcher
        .fetch_subtree(&descriptor("servers/alpha"), &dest)
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Download { .. }));
    assert!(!dest.exists());
    // No staging directory is left behind either.
    let leftovers: Vec<_> = std::fs::read_dir(tmp.path()).unwrap().collect();
    assert!(leftovers.is_empty());
}

#[tokio::test]
async fn listing_outside_the_subtree_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("alpha");
    let repo = FakeRepo::default()
        .dir("servers/alpha", vec![file("servers/beta/c.py")])
        .file("servers/beta/c.py", "x");
    let (fetcher, _) = fetcher(repo);

    let err = fetcher
        .fetch_subtree(&descriptor("servers/alpha"), &dest)
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::PathTraversal { .. }));
    assert!(!dest.exists());
}

#[tokio::test]
async fn prefix_sibling_is_not_inside_subtree() {
    let tmp = tempfile::tempdir().unwrap();
    let repo = FakeRepo::default()
        .dir("servers/alpha", vec![file("servers/alphabet/x.py")])
        .file("servers/alphabet/x.py", "x");
    let (fetcher, _) = fetcher(repo);
    let err = fetcher
        .fetch_subtree(&descriptor("servers/alpha"), &tmp.path().join("alpha"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::PathTraversal { .. }));
}

#[tokio::test]
async fn traversing_subtree_path_is_rejected_before_any_request() {
    let tmp = tempfile::tempdir().unwrap();
    let (fetcher, repo) = fetcher(alpha_repo());
    for bad in ["", "/", "servers/../../etc"] {
        let err = fetcher
            .fetch_subtree(&descriptor(bad), &tmp.path().join("alpha"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidSubtree { .. }), "{bad:?}");
    }
    assert!(repo.listed.lock().unwrap().is_empty());
}

#[tokio::test]
async fn symlinks_and_submodules_are_skipped_and_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("alpha");
    let mut link = file("servers/alpha/link");
    link.entry_type = RemoteEntryType::Symlink;
    let mut module = dir("servers/alpha/vendor");
    module.entry_type = RemoteEntryType::Submodule;
    let repo = FakeRepo::default()
        .dir("servers/alpha", vec![file("servers/alpha/a.py"), link, module])
        .file("servers/alpha/a.py", "a");
    let (fetcher, _) = fetcher(repo);

    let report = fetcher
        .fetch_subtree(&descriptor("servers/alpha"), &dest)
        .await
        .unwrap();
    assert_eq!(report.files, 1);
    let skipped: Vec<_> = report.skipped.iter().map(|s| s.path.as_str()).collect();
    assert_eq!(skipped, ["servers/alpha/link", "servers/alpha/vendor"]);
    assert!(!dest.join("link").exists());
}

#[tokio::test]
async fn entry_cap_bounds_the_walk() {
    let tmp = tempfile::tempdir().unwrap();
    let source: Arc<dyn ContentsSource> = Arc::new(alpha_repo());
    let fetcher = SelectiveFetcher::new(source, "main", 2);
    let err = fetcher
        .fetch_subtree(&descriptor("servers/alpha"), &tmp.path().join("alpha"))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::TooManyEntries { limit: 2 }));
}

#[tokio::test]
async fn github_source_mirrors_through_contents_api() {
    let mut server = mockito::Server::new_async().await;
    let base = server.url();
    let root_listing = serde_json::json!([
        {"name": "a.py", "type": "file", "path": "servers/alpha/a.py",
         "download_url": format!("{base}/raw/a.py")},
        {"name": "sub", "type": "dir", "path": "servers/alpha/sub", "download_url": null}
    ]);
    let sub_listing = serde_json::json!([
        {"name": "b.py", "type": "file", "path": "servers/alpha/sub/b.py",
         "download_url": format!("{base}/raw/b.py")}
    ]);

    let _root = server
        .mock("GET", "/repos/acme/mcp-store/contents/servers/alpha")
        .match_query(mockito::Matcher::UrlEncoded("ref".into(), "main".into()))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(root_listing.to_string())
        .create_async()
        .await;
    let _sub = server
        .mock("GET", "/repos/acme/mcp-store/contents/servers/alpha/sub")
        .match_query(mockito::Matcher::UrlEncoded("ref".into(), "main".into()))
        .with_status(200)
        .with_body(sub_listing.to_string())
        .create_async()
        .await;
    let _a = server
        .mock("GET", "/raw/a.py")
        .with_status(200)
        .with_body("print('a')")
        .create_async()
        .await;
    let _b = server
        .mock("GET", "/raw/b.py")
        .with_status(200)
        .with_body("print('b')")
        .create_async()
        .await;

    let source: Arc<dyn ContentsSource> = Arc::new(GitHubContents::new(
        reqwest::Client::new(),
        base.clone(),
        Duration::from_secs(5),
        1024,
    ));
    let fetcher = SelectiveFetcher::new(source, "main", 100);
    let tmp = tempfile::tempdir().unwrap();
    let dest = tmp.path().join("alpha");

    fetcher
        .fetch_subtree(&descriptor("servers/alpha"), &dest)
        .await
        .unwrap();
    assert_eq!(std::fs::read_to_string(dest.join("a.py")).unwrap(), "print('a')");
    assert_eq!(std::fs::read_to_string(dest.join("sub/b.py")).unwrap(), "print('b')");
}

#[tokio::test]
async fn github_error_message_surfaces_as_listing_error() {
    let mut server = mockito::Server::new_async().await;
    let _missing = server
        .mock("GET", "/repos/acme/mcp-store/contents/servers/alpha")
        .match_query(mockito::Matcher::Any)
        .with_status(404)
        .with_body(r#"{"message": "Not Found"}"#)
        .create_async()
        .await;

    let source = GitHubContents::new(reqwest::Client::new(), server.url(), Duration::from_secs(5), 1024);
    let err = source
        .list_dir("https://github.com/acme/mcp-store", "main", "servers/alpha")
        .await
        .unwrap_err();
    let FetchError::Listing { message, .. } = err else {
        panic!("expected listing error, got {err:?}");
    };
    assert!(message.contains("Not Found"));
}

#[tokio::test]
async fn github_download_enforces_size_cap() {
    let mut server = mockito::Server::new_async().await;
    let _big = server
        .mock("GET", "/raw/big.bin")
        .with_status(200)
        .with_body(vec![0_u8; 4096])
        .create_async()
        .await;

    let source = GitHubContents::new(reqwest::Client::new(), server.url(), Duration::from_secs(5), 1024);
    let mut entry = file("servers/alpha/big.bin");
    entry.download_url = Some(format!("{}/raw/big.bin", server.url()));
    let err = source.download(&entry).await.unwrap_err();
    assert!(matches!(err, FetchError::TooLarge { limit: 1024, .. }));
}
