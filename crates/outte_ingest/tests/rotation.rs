use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;

use outte_ingest::fetch::INVALID_IDENTITY;
use outte_ingest::{BoardSource, DojoClient, FetchContext, Fetched};
use outte_store::{BoardRef, BoardType, FetchConfig, OutteResult, RawEntry, ScoreValue};

/// Minimal HTTP server answering every request with `respond(target)`.
struct Dojo {
    base_url: String,
    targets: Arc<Mutex<Vec<String>>>,
}

impl Dojo {
    fn serve<F>(respond: F) -> Self
    where
        F: Fn(&str) -> String + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let targets = Arc::new(Mutex::new(Vec::new()));
        let seen = targets.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { continue };
                let mut reader = BufReader::new(stream.try_clone().expect("clone stream"));
                let mut request_line = String::new();
                if reader.read_line(&mut request_line).is_err() {
                    continue;
                }
                loop {
                    let mut header = String::new();
                    match reader.read_line(&mut header) {
                        Ok(0) | Err(_) => break,
                        Ok(_) if header == "\r\n" => break,
                        Ok(_) => {}
                    }
                }
                let target = request_line
                    .split_whitespace()
                    .nth(1)
                    .unwrap_or_default()
                    .to_string();
                let body = respond(&target);
                seen.lock().expect("lock").push(target);
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });
        Self {
            base_url: format!("http://{addr}/prod/steam"),
            targets,
        }
    }

    fn client(&self, identities: Vec<u64>) -> DojoClient {
        DojoClient::new(&FetchConfig {
            base_url: self.base_url.clone(),
            identities,
            timeout_ms: 2_000,
            connect_timeout_ms: 2_000,
            ..FetchConfig::default()
        })
    }

    fn targets(&self) -> Vec<String> {
        self.targets.lock().expect("lock").clone()
    }

    fn identities_seen(&self) -> Vec<u64> {
        self.targets()
            .iter()
            .filter_map(|target| query_param(target, "steam_id"))
            .filter_map(|id| id.parse().ok())
            .collect()
    }
}

fn query_param<'a>(target: &'a str, key: &str) -> Option<&'a str> {
    let (_, query) = target.split_once('?')?;
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| *name == key)
        .map(|(_, value)| value)
}

fn accepting_only(identity: &'static str, body: &'static str) -> impl Fn(&str) -> String {
    move |target: &str| {
        if query_param(target, "steam_id") == Some(identity) {
            body.to_string()
        } else {
            INVALID_IDENTITY.to_string()
        }
    }
}

#[tokio::test]
async fn refused_identities_are_skipped_and_the_working_one_sticks() -> OutteResult<()> {
    let dojo = Dojo::serve(accepting_only(
        "33",
        r#"{"scores":[{"user_id":5,"user_name":"erin","score":42000,"replay_id":7}]}"#,
    ));
    let client = dojo.client(vec![11, 22, 33]);
    let ctx = FetchContext::new();
    let board = BoardRef::new(BoardType::Level, 12);

    let fetched = client.fetch_board_entries(&ctx, board).await?;
    assert_eq!(
        fetched,
        Fetched::Data(vec![RawEntry {
            user_id: 5,
            user_name: "erin".to_string(),
            score: ScoreValue(42_000),
            replay_id: 7,
        }])
    );
    assert_eq!(dojo.identities_seen(), vec![11, 22, 33]);
    assert_eq!(ctx.position(), 2);
    assert!(
        dojo.targets()
            .iter()
            .all(|target| query_param(target, "level_id") == Some("12"))
    );

    client.fetch_board_entries(&ctx.clone(), board).await?;
    assert_eq!(dojo.identities_seen(), vec![11, 22, 33, 33]);
    assert_eq!(ctx.position(), 2);
    Ok(())
}

#[tokio::test]
async fn a_full_cycle_of_refusals_yields_no_data() -> OutteResult<()> {
    let dojo = Dojo::serve(|_| INVALID_IDENTITY.to_string());
    let client = dojo.client(vec![11, 22, 33]);
    let ctx = FetchContext::starting_at(1);

    let fetched = client
        .fetch_board_entries(&ctx, BoardRef::new(BoardType::Episode, 4))
        .await?;
    assert_eq!(fetched, Fetched::NoData);
    assert_eq!(dojo.identities_seen(), vec![22, 33, 11]);
    assert_eq!(ctx.position(), 1);
    Ok(())
}

#[tokio::test]
async fn empty_replay_body_means_not_found() -> OutteResult<()> {
    let dojo = Dojo::serve(accepting_only("22", ""));
    let client = dojo.client(vec![11, 22]);
    let ctx = FetchContext::new();

    let fetched = client.fetch_replay(&ctx, BoardType::Story, 987).await?;
    assert_eq!(fetched, Fetched::NotFound);
    assert_eq!(dojo.identities_seen(), vec![11, 22]);
    let targets = dojo.targets();
    let last = targets.last().expect("request");
    assert!(last.contains("/get_replay?"));
    assert_eq!(query_param(last, "replay_id"), Some("987"));
    assert_eq!(query_param(last, "qt"), Some("4"));
    Ok(())
}
