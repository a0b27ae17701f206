use std::path::{Path, PathBuf};
use std::sync::Arc;

use crawler::{
    artifacts::ArtifactStore, server::CallbackServer, utils::get_random_string,
    worklist::Worklist,
};

macro_rules! aw {
    ($e:expr) => {
        tokio_test::block_on($e)
    };
}

fn tmp_dir() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("crawler-test-{}", get_random_string(8)));
    std::fs::create_dir(&dir).unwrap();
    dir
}

fn stored_files(dir: &Path) -> Vec<PathBuf> {
    let mut files = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect::<Vec<_>>();
    files.sort();
    files
}

async fn start_server(urls: &[&str], outdir: &Path) -> (CallbackServer, Arc<Worklist>) {
    let worklist = Arc::new(Worklist::new(
        urls.iter().map(|u| u.to_string()).collect(),
    ));
    let store = Arc::new(ArtifactStore::new(outdir));
    let server = CallbackServer::start(worklist.clone(), store, 300, 15)
        .await
        .unwrap();
    (server, worklist)
}

#[test]
fn parameters_reports_worklist_and_limits() {
    let dir = tmp_dir();
    aw!(async {
        let (mut server, _worklist) =
            start_server(&["http://a.example/x", "http://b.example/y"], &dir).await;

        let res = reqwest::get(format!("http://127.0.0.1:{}/parameters", server.port()))
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 200);

        let v: serde_json::Value = res.json().await.unwrap();
        assert_eq!(
            v["urls"],
            serde_json::json!(["http://a.example/x", "http://b.example/y"])
        );
        // seconds on the command line, milliseconds on the wire
        assert_eq!(v["timeout"], 300000);
        assert_eq!(v["maxtabs"], 15);

        server.shutdown().await;
    });
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn save_persists_then_removes_from_worklist() {
    let dir = tmp_dir();
    aw!(async {
        let (mut server, worklist) =
            start_server(&["http://a.example/x", "http://b.example/y"], &dir).await;
        let client = reqwest::Client::new();

        let body = serde_json::json!({
            "url": "http://a.example/x",
            "startTime": 1673524000123i64,
            "requests": []
        });
        let res = client
            .post(format!("http://127.0.0.1:{}/save", server.port()))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 204);

        assert_eq!(worklist.remaining().await, vec!["http://b.example/y"]);
        let files = stored_files(&dir);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].extension().unwrap(), "json");

        server.shutdown().await;
    });
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn malformed_save_changes_nothing() {
    let dir = tmp_dir();
    aw!(async {
        let (mut server, worklist) = start_server(&["http://a.example/x"], &dir).await;
        let client = reqwest::Client::new();

        let res = client
            .post(format!("http://127.0.0.1:{}/save", server.port()))
            .body("{ not json")
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 400);

        assert_eq!(worklist.len().await, 1);
        assert!(stored_files(&dir).is_empty());

        server.shutdown().await;
    });
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn unknown_routes_are_not_found() {
    let dir = tmp_dir();
    aw!(async {
        let (mut server, _worklist) = start_server(&[], &dir).await;

        let res = reqwest::get(format!("http://127.0.0.1:{}/status", server.port()))
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 404);

        server.shutdown().await;
    });
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn save_splits_payloads_into_artifact_trio() {
    use base64::Engine;

    let dir = tmp_dir();
    aw!(async {
        let (mut server, _worklist) = start_server(&["http://a.example/x"], &dir).await;
        let client = reqwest::Client::new();

        let jpeg = base64::engine::general_purpose::STANDARD.encode([0xffu8, 0xd8, 0xff, 0xe0]);
        let body = serde_json::json!({
            "url": "http://a.example/x",
            "startTime": 1673524000123i64,
            "screenshot": format!("data:image/jpeg;base64,{}", jpeg),
            "source": "<html><body>hi</body></html>",
            "frames": [],
            "requests": []
        });
        let res = client
            .post(format!("http://127.0.0.1:{}/save", server.port()))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(res.status().as_u16(), 204);

        let files = stored_files(&dir);
        let extensions = files
            .iter()
            .map(|f| f.extension().unwrap().to_str().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(extensions, vec!["jpg", "json", "xml"]);

        // all three share the artifact base name
        let stems = files
            .iter()
            .map(|f| f.file_stem().unwrap().to_str().unwrap())
            .collect::<std::collections::HashSet<_>>();
        assert_eq!(stems.len(), 1);

        let metadata = std::fs::read_to_string(&files[1]).unwrap();
        assert!(metadata.ends_with('\n'));
        assert!(!metadata.contains("screenshot"));
        assert!(!metadata.contains("source"));
        // pretty printed with sorted keys
        let frames = metadata.find("\"frames\"").unwrap();
        let requests = metadata.find("\"requests\"").unwrap();
        let start = metadata.find("\"startTime\"").unwrap();
        let url = metadata.find("\"url\"").unwrap();
        assert!(frames < requests && requests < start && start < url);

        server.shutdown().await;
    });
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn concurrent_saves_drain_the_worklist() {
    let dir = tmp_dir();
    aw!(async {
        let urls = (0..10)
            .map(|i| format!("http://site{}.example/", i))
            .collect::<Vec<_>>();
        let refs = urls.iter().map(|u| u.as_str()).collect::<Vec<_>>();
        let (mut server, worklist) = start_server(&refs, &dir).await;
        let client = reqwest::Client::new();

        let statuses = futures::future::join_all(urls.iter().enumerate().map(|(i, url)| {
            let client = client.clone();
            let endpoint = format!("http://127.0.0.1:{}/save", server.port());
            let body = serde_json::json!({
                "url": url,
                "startTime": 1673524000000i64 + i as i64,
            });
            async move {
                client
                    .post(endpoint)
                    .json(&body)
                    .send()
                    .await
                    .unwrap()
                    .status()
                    .as_u16()
            }
        }))
        .await;

        assert!(statuses.iter().all(|s| *s == 204));
        assert!(worklist.is_empty().await);
        assert_eq!(stored_files(&dir).len(), 10);

        server.shutdown().await;
    });
    std::fs::remove_dir_all(dir).unwrap();
}

#[test]
fn late_save_for_unknown_url_is_accepted() {
    let dir = tmp_dir();
    aw!(async {
        let (mut server, worklist) = start_server(&["http://b.example/y"], &dir).await;
        let client = reqwest::Client::new();

        let body = serde_json::json!({
            "url": "http://z.example/",
            "startTime": 1673524000123i64,
        });
        let res = client
            .post(format!("http://127.0.0.1:{}/save", server.port()))
            .json(&body)
            .send()
            .await
            .unwrap();

        // the artifact is kept, the removal is a no-op
        assert_eq!(res.status().as_u16(), 204);
        assert_eq!(worklist.remaining().await, vec!["http://b.example/y"]);
        assert_eq!(stored_files(&dir).len(), 1);

        server.shutdown().await;
    });
    std::fs::remove_dir_all(dir).unwrap();
}
