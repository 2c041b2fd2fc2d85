//! End-to-end tests: a real server bound to an ephemeral port, driven
//! through plain TCP clients.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use reactornet::config::{Config, LocationConfig, ServerConfig};
use reactornet::error::ServerError;
use reactornet::server::Server;

struct TestServer {
    port: u16,
    handle: JoinHandle<Result<(), ServerError>>,
    root: PathBuf,
}

impl TestServer {
    /// Builds a config rooted in a fresh temp directory and runs the
    /// reactor on its own thread. The server is not `Send` (task graph is
    /// `Rc`-based), so it is constructed inside the thread and reports its
    /// ephemeral port back over a channel.
    fn start(tag: &str, locations: HashMap<String, LocationConfig>) -> Self {
        Self::start_server(
            tag,
            ServerConfig {
                locations,
                ..ServerConfig::default()
            },
        )
    }

    fn start_server(tag: &str, mut server: ServerConfig) -> Self {
        let root = std::env::temp_dir().join(format!("reactornet-{tag}-{}", std::process::id()));
        std::fs::create_dir_all(&root).expect("temp root");

        server.port = Some(0);
        server.root = Some(root.to_string_lossy().into_owned());
        let config = Config {
            servers: vec![server],
            ..Config::default()
        };

        let (tx, rx) = mpsc::channel();
        let handle = std::thread::spawn(move || {
            let mut server = Server::new(&config).expect("server starts");
            tx.send(server.ports()[0]).expect("port reported");
            server.run()
        });
        let port = rx.recv().expect("server thread alive");
        Self { port, handle, root }
    }

    fn exchange(&self, request: &[u8]) -> Vec<u8> {
        let mut stream =
            TcpStream::connect(("127.0.0.1", self.port)).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        stream.write_all(request).expect("request written");
        let mut response = Vec::new();
        stream.read_to_end(&mut response).expect("response read");
        response
    }

    fn cleanup(self) {
        std::fs::remove_dir_all(&self.root).ok();
    }
}

fn status_line(response: &[u8]) -> String {
    let text = String::from_utf8_lossy(response);
    text.lines().next().unwrap_or("").to_string()
}

fn body_of(response: &[u8]) -> Vec<u8> {
    let marker = b"\r\n\r\n";
    let pos = response
        .windows(marker.len())
        .position(|w| w == marker)
        .expect("header terminator");
    response[pos + marker.len()..].to_vec()
}

fn open_location(root: &Path) -> HashMap<String, LocationConfig> {
    let mut locations = HashMap::new();
    locations.insert(
        "/".to_string(),
        LocationConfig {
            root: Some(root.to_string_lossy().into_owned()),
            ..LocationConfig::default()
        },
    );
    locations
}

#[test]
fn serves_static_file() {
    let root = std::env::temp_dir().join(format!("reactornet-static-{}", std::process::id()));
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(root.join("hello.txt"), b"hello over tcp").unwrap();

    let server = TestServer::start("static", open_location(&root));
    let response = server.exchange(b"GET /hello.txt HTTP/1.1\r\nHost: localhost\r\n\r\n");

    assert!(status_line(&response).contains("200 OK"));
    assert_eq!(body_of(&response), b"hello over tcp");
    server.cleanup();
    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn missing_file_gets_error_page() {
    let root = std::env::temp_dir().join(format!("reactornet-missing-{}", std::process::id()));
    std::fs::create_dir_all(&root).unwrap();

    let server = TestServer::start("missing", open_location(&root));
    let response = server.exchange(b"GET /nope.html HTTP/1.1\r\nHost: localhost\r\n\r\n");

    assert!(status_line(&response).contains("404"));
    assert!(String::from_utf8_lossy(&response).contains("File not found"));
    server.cleanup();
    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn put_creates_file() {
    let root = std::env::temp_dir().join(format!("reactornet-put-{}", std::process::id()));
    std::fs::create_dir_all(&root).unwrap();

    let server = TestServer::start("put", open_location(&root));
    let response = server.exchange(
        b"PUT /upload.txt HTTP/1.1\r\nHost: localhost\r\nContent-Length: 9\r\n\r\nfresh dat",
    );

    assert!(status_line(&response).contains("201"));
    assert_eq!(std::fs::read(root.join("upload.txt")).unwrap(), b"fresh dat");
    server.cleanup();
    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn location_limit_cannot_raise_server_ceiling() {
    let root = std::env::temp_dir().join(format!("reactornet-ceiling-{}", std::process::id()));
    std::fs::create_dir_all(&root).unwrap();

    let mut locations = HashMap::new();
    locations.insert(
        "/".to_string(),
        LocationConfig {
            root: Some(root.to_string_lossy().into_owned()),
            max_request_size: Some(1000),
            ..LocationConfig::default()
        },
    );
    let server = TestServer::start_server(
        "ceiling",
        ServerConfig {
            max_request_size: Some(10),
            locations,
            ..ServerConfig::default()
        },
    );

    let mut request =
        b"PUT /big.txt HTTP/1.1\r\nHost: localhost\r\nContent-Length: 100\r\n\r\n".to_vec();
    request.extend_from_slice(&[b'a'; 100]);
    let response = server.exchange(&request);

    assert!(status_line(&response).contains("413"));
    assert!(!root.join("big.txt").exists());
    server.cleanup();
    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn chunked_body_over_the_limit_is_rejected() {
    let root = std::env::temp_dir().join(format!("reactornet-chunklimit-{}", std::process::id()));
    std::fs::create_dir_all(&root).unwrap();

    let server = TestServer::start_server(
        "chunklimit",
        ServerConfig {
            max_request_size: Some(10),
            locations: open_location(&root),
            ..ServerConfig::default()
        },
    );
    let response = server.exchange(
        b"PUT /limited.txt HTTP/1.1\r\nHost: localhost\r\n\
          Transfer-Encoding: chunked\r\n\r\n\
          14\r\ntwenty bytes of body\r\n0\r\n\r\n",
    );

    assert!(status_line(&response).contains("413"));
    assert!(!root.join("limited.txt").exists());
    server.cleanup();
    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn redirect_location_short_circuits() {
    let mut locations = HashMap::new();
    locations.insert(
        "/old".to_string(),
        LocationConfig {
            redirect: Some("https://example.com/new".to_string()),
            ..LocationConfig::default()
        },
    );

    let server = TestServer::start("redirect", locations);
    let response = server.exchange(b"GET /old/page HTTP/1.1\r\nHost: localhost\r\n\r\n");

    assert!(status_line(&response).contains("301"));
    assert!(String::from_utf8_lossy(&response)
        .contains("Location: https://example.com/new/page"));
    server.cleanup();
}

#[test]
fn chunked_body_is_reassembled() {
    let root = std::env::temp_dir().join(format!("reactornet-chunked-{}", std::process::id()));
    std::fs::create_dir_all(&root).unwrap();

    let server = TestServer::start("chunked", open_location(&root));
    let response = server.exchange(
        b"PUT /chunked.txt HTTP/1.1\r\nHost: localhost\r\n\
          Transfer-Encoding: chunked\r\n\r\n\
          5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
    );

    assert!(status_line(&response).contains("201"));
    assert_eq!(std::fs::read(root.join("chunked.txt")).unwrap(), b"hello world");
    server.cleanup();
    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn cgi_script_runs_end_to_end() {
    let root = std::env::temp_dir().join(format!("reactornet-cgi-{}", std::process::id()));
    std::fs::create_dir_all(&root).unwrap();
    std::fs::write(
        root.join("greet.sh"),
        "printf 'Content-Type: text/plain\\r\\n\\r\\nhi from cgi'\n",
    )
    .unwrap();

    let mut locations = HashMap::new();
    locations.insert(
        "/cgi".to_string(),
        LocationConfig {
            allow_cgi: true,
            root: Some(root.to_string_lossy().into_owned()),
            ..LocationConfig::default()
        },
    );

    let server = TestServer::start("cgi", locations);
    let response = server.exchange(b"GET /cgi/greet.sh HTTP/1.1\r\nHost: localhost\r\n\r\n");

    assert!(status_line(&response).contains("200"));
    assert_eq!(body_of(&response), b"hi from cgi");
    server.cleanup();
    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn failing_cgi_script_answers_500() {
    let root = std::env::temp_dir().join(format!("reactornet-cgifail-{}", std::process::id()));
    std::fs::create_dir_all(&root).unwrap();
    // The script writes a plausible response but exits non-zero; its output
    // must be discarded in favor of a 500.
    std::fs::write(
        root.join("crash.sh"),
        "printf 'Content-Type: text/plain\\r\\n\\r\\nlooks fine'\nexit 1\n",
    )
    .unwrap();

    let mut locations = HashMap::new();
    locations.insert(
        "/cgi".to_string(),
        LocationConfig {
            allow_cgi: true,
            root: Some(root.to_string_lossy().into_owned()),
            ..LocationConfig::default()
        },
    );

    let server = TestServer::start("cgifail", locations);
    let response = server.exchange(b"GET /cgi/crash.sh HTTP/1.1\r\nHost: localhost\r\n\r\n");

    assert!(status_line(&response).contains("500"));
    assert_ne!(body_of(&response), b"looks fine");
    server.cleanup();
    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn close_body_stops_the_reactor() {
    let root = std::env::temp_dir().join(format!("reactornet-close-{}", std::process::id()));
    std::fs::create_dir_all(&root).unwrap();

    let server = TestServer::start("close", open_location(&root));
    let mut stream = TcpStream::connect(("127.0.0.1", server.port)).expect("connect");
    stream
        .write_all(b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nclose")
        .expect("shutdown request written");

    let outcome = server.handle.join().expect("server thread joined");
    assert!(matches!(outcome, Err(ServerError::ShutdownSignal)));
    std::fs::remove_dir_all(&root).ok();
}
