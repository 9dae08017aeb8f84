use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use outte_store::{
    BoardRef, BoardType, FetchConfig, OutteError, OutteResult, RawEntry, ScoresPayload,
};

/// Body the upstream server sends when a requester identity is inactive.
pub const INVALID_IDENTITY: &str = "-1337";

/// Result of one upstream request after identity rotation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fetched<T> {
    Data(T),
    /// The server answered that the object does not exist.
    NotFound,
    /// Every identity was refused; nothing can be concluded.
    NoData,
}

/// Position in the requester identity rotation.
///
/// Clones share the cursor, so every task fetching with the same context
/// keeps using the identity that last worked.
#[derive(Clone, Debug, Default)]
pub struct FetchContext {
    cursor: Arc<AtomicUsize>,
}

impl FetchContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(position: usize) -> Self {
        Self {
            cursor: Arc::new(AtomicUsize::new(position)),
        }
    }

    pub fn position(&self) -> usize {
        self.cursor.load(Ordering::Relaxed)
    }

    /// Identity at the cursor, wrapping around the pool.
    pub fn current(&self, identities: &[u64]) -> Option<u64> {
        if identities.is_empty() {
            return None;
        }
        identities.get(self.position() % identities.len()).copied()
    }

    pub fn advance(&self, pool_size: usize) {
        if pool_size == 0 {
            return;
        }
        let _ = self
            .cursor
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |pos| {
                Some((pos + 1) % pool_size)
            });
    }
}

#[async_trait]
pub trait BoardSource: Send + Sync {
    async fn fetch_board_entries(
        &self,
        ctx: &FetchContext,
        board: BoardRef,
    ) -> OutteResult<Fetched<Vec<RawEntry>>>;

    /// Raw replay response: header plus compressed payload.
    async fn fetch_replay(
        &self,
        ctx: &FetchContext,
        board_type: BoardType,
        replay_id: i64,
    ) -> OutteResult<Fetched<Vec<u8>>>;
}

/// HTTP client for the game's leaderboard server.
#[derive(Clone)]
pub struct DojoClient {
    agent: ureq::Agent,
    base_url: String,
    identities: Vec<u64>,
}

impl DojoClient {
    pub fn new(config: &FetchConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.timeout_ms))
            .build();
        Self {
            agent,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            identities: config.identities.clone(),
        }
    }

    pub fn identities(&self) -> &[u64] {
        &self.identities
    }

    pub fn scores_url(&self, identity: u64, board: BoardRef) -> String {
        format!(
            "{}/get_scores?steam_id={identity}&steam_auth=&{}={}",
            self.base_url,
            board.board_type.query_key(),
            board.board_id
        )
    }

    pub fn replay_url(&self, identity: u64, board_type: BoardType, replay_id: i64) -> String {
        format!(
            "{}/get_replay?steam_id={identity}&steam_auth=&replay_id={replay_id}&qt={}",
            self.base_url,
            board_type.replay_qt()
        )
    }

    /// Issues the request built by `url_for` with successive identities until
    /// one is accepted or the pool has been cycled once.
    async fn rotate<F>(&self, ctx: &FetchContext, url_for: F) -> OutteResult<Fetched<Vec<u8>>>
    where
        F: Fn(u64) -> String + Send,
    {
        if self.identities.is_empty() {
            return Err(OutteError::configuration(
                "no requester identities configured under fetch.identities",
            ));
        }
        for _ in 0..self.identities.len() {
            let Some(identity) = ctx.current(&self.identities) else {
                break;
            };
            let body = self.get(url_for(identity)).await?;
            if body.as_slice() == INVALID_IDENTITY.as_bytes() {
                debug!("identity {identity} refused, rotating");
                ctx.advance(self.identities.len());
                continue;
            }
            return Ok(Fetched::Data(body));
        }
        warn!(
            "all {} requester identities were refused",
            self.identities.len()
        );
        Ok(Fetched::NoData)
    }

    async fn get(&self, url: String) -> OutteResult<Vec<u8>> {
        let agent = self.agent.clone();
        tokio::task::spawn_blocking(move || -> OutteResult<Vec<u8>> {
            let response = agent.get(&url).call().map_err(|err| match err {
                ureq::Error::Status(code, _) => {
                    OutteError::transient(format!("server answered {code}"))
                }
                ureq::Error::Transport(transport) => OutteError::transient(transport.to_string()),
            })?;
            let mut body = Vec::new();
            response
                .into_reader()
                .read_to_end(&mut body)
                .map_err(|err| OutteError::transient(format!("read body: {err}")))?;
            Ok(body)
        })
        .await
        .map_err(|err| OutteError::transient(format!("fetch task join error: {err}")))?
    }
}

#[async_trait]
impl BoardSource for DojoClient {
    async fn fetch_board_entries(
        &self,
        ctx: &FetchContext,
        board: BoardRef,
    ) -> OutteResult<Fetched<Vec<RawEntry>>> {
        match self.rotate(ctx, |id| self.scores_url(id, board)).await? {
            Fetched::Data(body) => {
                let payload: ScoresPayload = serde_json::from_slice(&body).map_err(|err| {
                    OutteError::integrity(format!("{board}: malformed scores: {err}"))
                })?;
                Ok(Fetched::Data(payload.scores))
            }
            Fetched::NotFound => Ok(Fetched::NotFound),
            Fetched::NoData => Ok(Fetched::NoData),
        }
    }

    async fn fetch_replay(
        &self,
        ctx: &FetchContext,
        board_type: BoardType,
        replay_id: i64,
    ) -> OutteResult<Fetched<Vec<u8>>> {
        match self
            .rotate(ctx, |id| self.replay_url(id, board_type, replay_id))
            .await?
        {
            Fetched::Data(body) if body.is_empty() => Ok(Fetched::NotFound),
            other => Ok(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DojoClient, FetchContext};
    use outte_store::{BoardRef, BoardType, FetchConfig};

    fn client() -> DojoClient {
        DojoClient::new(&FetchConfig {
            base_url: "https://dojo.example/prod/steam/".to_string(),
            identities: vec![11, 22, 33],
            ..FetchConfig::default()
        })
    }

    #[test]
    fn urls_carry_identity_and_board_key() {
        let client = client();
        assert_eq!(
            client.scores_url(22, BoardRef::new(BoardType::Episode, 130)),
            "https://dojo.example/prod/steam/get_scores?steam_id=22&steam_auth=&episode_id=130"
        );
        assert_eq!(
            client.replay_url(11, BoardType::Story, 987),
            "https://dojo.example/prod/steam/get_replay?steam_id=11&steam_auth=&replay_id=987&qt=4"
        );
    }

    #[test]
    fn cursor_wraps_and_is_shared_by_clones() {
        let client = client();
        let ctx = FetchContext::starting_at(2);
        let shared = ctx.clone();
        assert_eq!(ctx.current(client.identities()), Some(33));
        shared.advance(client.identities().len());
        assert_eq!(ctx.current(client.identities()), Some(11));
        assert_eq!(FetchContext::new().current(&[]), None);
    }
}
