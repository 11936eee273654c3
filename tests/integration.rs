use axum::routing::{get, MethodRouter};
use axum::Router;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};
use std::time::Duration;
use tempfile::TempDir;

fn sdg_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("sdg");
    path
}

// ============ Local site ============

fn respond(content_type: &'static str, body: Vec<u8>) -> MethodRouter {
    get(move || {
        let body = body.clone();
        async move { ([(axum::http::header::CONTENT_TYPE, content_type)], body) }
    })
}

/// Single-page PDF with one line of Helvetica text and a correct xref table.
fn minimal_pdf(text: &str) -> Vec<u8> {
    let stream = format!("BT /F1 12 Tf 72 720 Td ({}) Tj ET", text);
    let objects = [
        "<< /Type /Catalog /Pages 2 0 R >>".to_string(),
        "<< /Type /Pages /Kids [3 0 R] /Count 1 >>".to_string(),
        "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents 4 0 R /Resources << /Font << /F1 5 0 R >> >> >>".to_string(),
        format!("<< /Length {} >>\nstream\n{}\nendstream", stream.len(), stream),
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica >>".to_string(),
    ];

    let mut out = b"%PDF-1.4\n".to_vec();
    let mut offsets = Vec::new();
    for (i, obj) in objects.iter().enumerate() {
        offsets.push(out.len());
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", i + 1, obj).as_bytes());
    }
    let xref = out.len();
    out.extend_from_slice(
        format!("xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1).as_bytes(),
    );
    for off in offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", off).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
            objects.len() + 1,
            xref
        )
        .as_bytes(),
    );
    out
}

fn site(base: &str) -> Router {
    let index = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <sitemap><loc>{base}/sitemap-reports.xml</loc></sitemap>
  <sitemap><loc>{base}/sitemap-pages.xml</loc></sitemap>
</sitemapindex>"#
    );
    let reports = format!(
        r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{base}/reports/water.html</loc></url>
  <url><loc>{base}/reports/energy.pdf</loc></url>
</urlset>"#
    );
    let pages = format!(
        r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>{base}/about.html</loc></url>
</urlset>"#
    );
    let feed = format!(
        r#"<rss version="2.0"><channel><title>Reports</title>
  <item><title>Water</title><link>{base}/reports/water.html</link></item>
  <item><title>Soil</title><link>{base}/reports/soil.html</link></item>
</channel></rss>"#
    );
    let water = "<html><head><title>Water</title><style>p{color:red}</style></head>\
        <body><h1>Water report</h1><p>Wells are drying up in the Sahel &amp; beyond.</p>\
        <script>var x = 1;</script></body></html>";
    let soil = "<html><body><p>Soil erosion threatens smallholder farms.</p></body></html>";

    Router::new()
        .route("/sitemap_index.xml", respond("application/xml", index.into_bytes()))
        .route("/sitemap-reports.xml", respond("application/xml", reports.into_bytes()))
        .route("/sitemap-pages.xml", respond("application/xml", pages.into_bytes()))
        .route("/feed.xml", respond("application/rss+xml", feed.into_bytes()))
        .route("/reports/water.html", respond("text/html; charset=utf-8", water.as_bytes().to_vec()))
        .route("/reports/soil.html", respond("text/html", soil.as_bytes().to_vec()))
        .route("/reports/energy.pdf", respond("application/pdf", minimal_pdf("Solar energy access")))
        .route("/about.html", respond("text/html", b"<p>About us</p>".to_vec()))
}

/// Serves the site from a background thread for the lifetime of the test
/// process. Returns its base URL.
fn serve_site() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = site(&base);

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });
    });
    base
}

// ============ Workspace ============

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn setup_test_env(site_base: &str) -> (TempDir, PathBuf, u16) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    fs::create_dir_all(root.join("config")).unwrap();
    fs::create_dir_all(root.join("data")).unwrap();
    fs::create_dir_all(root.join("seeds")).unwrap();

    let seed = format!(
        r#"[
  {{
    "name": "Local Org",
    "orgType": "ngo",
    "baseUrl": "{site_base}",
    "crawlEnabled": true,
    "rateLimitMs": 0,
    "endpoints": [
      {{ "endpointUrl": "{site_base}/sitemap_index.xml", "endpointType": "sitemap", "priority": 10,
         "parserHint": "{{\"includePathPrefixes\":[\"/reports/\"]}}" }},
      {{ "endpointUrl": "{site_base}/feed.xml", "endpointType": "rss", "priority": 20 }}
    ]
  }}
]"#
    );
    fs::write(root.join("seeds/sources.json"), seed).unwrap();

    let registry = Path::new(env!("CARGO_MANIFEST_DIR")).join("prompts/registry.json");
    let port = free_port();

    let config_content = format!(
        r#"[db]
path = "{root}/data/sdg.sqlite"

[server]
bind = "127.0.0.1:{port}"

[crawl]
default_rate_limit_ms = 0
timeout_secs = 10

[llm]
provider = "disabled"

[prompts]
registry = "{registry}"

[seeds]
sources = "{root}/seeds/sources.json"
"#,
        root = root.display(),
        port = port,
        registry = registry.display(),
    );

    let config_path = root.join("config/sdg.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path, port)
}

fn run_sdg(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sdg_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sdg binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn run_ok(config_path: &Path, args: &[&str]) -> String {
    let (stdout, stderr, success) = run_sdg(config_path, args);
    assert!(
        success,
        "sdg {:?} failed: stdout={}, stderr={}",
        args, stdout, stderr
    );
    stdout
}

/// ID column of the `documents list` row whose URL ends with `suffix`.
fn document_id(list_output: &str, suffix: &str) -> String {
    list_output
        .lines()
        .find(|l| l.trim_end().ends_with(suffix))
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or_else(|| panic!("no document ending in {} in:\n{}", suffix, list_output))
        .to_string()
}

fn seeded_env() -> (TempDir, PathBuf, u16, String) {
    let base = serve_site();
    let (tmp, config, port) = setup_test_env(&base);
    run_ok(&config, &["init"]);
    run_ok(&config, &["seed"]);
    (tmp, config, port, base)
}

// ============ Tests ============

#[test]
fn test_init_idempotent() {
    let (_tmp, config, _) = setup_test_env("http://127.0.0.1:9");

    let stdout = run_ok(&config, &["init"]);
    assert!(stdout.contains("initialized"));
    run_ok(&config, &["init"]);
}

#[test]
fn test_seed_sources_and_prompts() {
    let (_tmp, config, _, base) = seeded_env();

    // Second seed upserts the same rows.
    let stdout = run_ok(&config, &["seed"]);
    assert!(stdout.contains("sources upserted: 1"));
    assert!(stdout.contains("endpoints upserted: 2"));
    assert!(stdout.contains("prompts synced: 2"));
    assert!(stdout.contains("ok"));

    let sources = run_ok(&config, &["sources", "list"]);
    assert_eq!(sources.matches(&base).count(), 1);

    let endpoints = run_ok(&config, &["sources", "endpoints", "1"]);
    let sitemap_line = endpoints.lines().position(|l| l.contains("sitemap_index.xml"));
    let feed_line = endpoints.lines().position(|l| l.contains("feed.xml"));
    assert!(sitemap_line < feed_line, "priority order: {}", endpoints);

    let prompts = run_ok(&config, &["prompts", "list"]);
    assert!(prompts.contains("challenge_extractor.extract_challenges"));
    assert!(prompts.contains("technology_discovery.discover_paths"));
}

#[test]
fn test_discover_sitemap_index_keeps_then_skips() {
    let (_tmp, config, _, _) = seeded_env();

    let first = run_ok(&config, &["discover", "endpoint", "1"]);
    assert!(first.contains("sitemaps fetched: 3"), "{}", first);
    assert!(first.contains("kept: 2"), "{}", first);
    assert!(first.contains("filtered out: 1"), "{}", first);

    let second = run_ok(&config, &["discover", "endpoint", "1"]);
    assert!(second.contains("kept: 0"), "{}", second);
    assert!(second.contains("skipped (already known): 2"), "{}", second);

    let docs = run_ok(&config, &["documents", "list", "--status", "discovered"]);
    assert!(docs.contains("/reports/water.html"));
    assert!(docs.contains("/reports/energy.pdf"));
    assert!(!docs.contains("/about.html"));
}

#[test]
fn test_discover_source_runs_all_endpoints() {
    let (_tmp, config, _, _) = seeded_env();

    let stdout = run_ok(&config, &["discover", "source", "1"]);
    // The feed repeats water.html and adds soil.html.
    assert!(stdout.contains("kept: 2"));
    assert!(stdout.contains("kept: 1"));
    assert!(stdout.contains("skipped (already known): 1"));

    let docs = run_ok(&config, &["documents", "list"]);
    assert_eq!(docs.lines().filter(|l| l.contains("/reports/")).count(), 3);
}

#[test]
fn test_fetch_html_and_pdf() {
    let (_tmp, config, _, _) = seeded_env();
    run_ok(&config, &["discover", "endpoint", "1"]);

    let list = run_ok(&config, &["documents", "list"]);
    let html_id = document_id(&list, "/reports/water.html");
    let pdf_id = document_id(&list, "/reports/energy.pdf");

    let html = run_ok(&config, &["documents", "fetch", &html_id]);
    assert!(html.contains("content type: text/html"));
    assert!(html.contains("status: extracted"));
    assert!(html.contains("ok"));

    let text = run_ok(&config, &["documents", "text", &html_id]);
    assert!(text.contains("Wells are drying up in the Sahel & beyond."));
    assert!(!text.contains("color:red"));
    assert!(!text.contains("var x"));

    let pdf = run_ok(&config, &["documents", "fetch", &pdf_id]);
    assert!(pdf.contains("content type: application/pdf"));
    assert!(pdf.contains("sha256: "));
}

#[test]
fn test_fetch_pending_records_failures() {
    let (_tmp, config, _, base) = seeded_env();
    run_ok(&config, &["discover", "endpoint", "1"]);

    let missing = format!("{}/reports/missing.html", base);
    let added = run_ok(
        &config,
        &["sources", "add-endpoint", "1", &missing, "--type", "manual_seed"],
    );
    assert!(added.contains("endpoint 3 saved"), "{}", added);
    let manual = run_ok(&config, &["discover", "endpoint", "3"]);
    assert!(manual.contains("kept: 1"));

    let stdout = run_ok(&config, &["documents", "fetch-pending", "--limit", "10"]);
    assert!(stdout.contains("attempted: 3"), "{}", stdout);
    assert!(stdout.contains("failed: 1"), "{}", stdout);

    let failed = run_ok(&config, &["documents", "list", "--status", "failed"]);
    assert!(failed.contains("/reports/missing.html"));

    let pending = run_ok(&config, &["documents", "list", "--status", "discovered"]);
    assert!(pending.contains("No documents."));
}

#[test]
fn test_invalid_endpoint_input_is_rejected() {
    let (_tmp, config, _, _) = seeded_env();

    let (_, stderr, success) = run_sdg(
        &config,
        &["sources", "add-endpoint", "1", "ftp://example.org/feed", "--type", "rss"],
    );
    assert!(!success);
    assert!(stderr.contains("http(s)"), "{}", stderr);

    let (_, stderr, success) = run_sdg(
        &config,
        &["sources", "add-endpoint", "1", "https://example.org/x", "--type", "feed"],
    );
    assert!(!success);
    assert!(stderr.contains("invalid EndpointType"), "{}", stderr);
}

#[test]
fn test_extract_without_model_fails_cleanly() {
    let (_tmp, config, _, _) = seeded_env();

    let (_, stderr, success) = run_sdg(
        &config,
        &["challenges", "extract", "--text", "Wells are drying up."],
    );
    assert!(!success);
    assert!(stderr.contains("not available"), "{}", stderr);

    let challenges = run_ok(&config, &["challenges", "list"]);
    assert!(challenges.contains("No challenges."));
}

struct KillOnDrop(Child);

impl Drop for KillOnDrop {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

#[test]
fn test_serve_health_and_auth_gate() {
    let (_tmp, config, port, _) = seeded_env();

    let child = Command::new(sdg_binary())
        .arg("--config")
        .arg(config.to_str().unwrap())
        .arg("serve")
        .spawn()
        .unwrap();
    let _guard = KillOnDrop(child);

    let client = reqwest::blocking::Client::new();
    let health_url = format!("http://127.0.0.1:{}/health", port);
    let mut health = None;
    for _ in 0..50 {
        if let Ok(res) = client.get(&health_url).send() {
            health = Some(res);
            break;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    let health = health.expect("server did not start");
    assert_eq!(health.status(), 200);
    let body: serde_json::Value = health.json().unwrap();
    assert_eq!(body["status"], "ok");

    let res = client
        .get(format!("http://127.0.0.1:{}/api/sources", port))
        .send()
        .unwrap();
    assert_eq!(res.status(), 401);

    let challenges: serde_json::Value = client
        .get(format!("http://127.0.0.1:{}/api/challenges", port))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(challenges, serde_json::json!([]));
}
