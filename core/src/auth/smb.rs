//! SMB2 over direct TCP, authenticated with NTLMv2.

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, bail, ensure};
use async_trait::async_trait;
use smbscout_common::config::Credentials;
use smbscout_protocols::ntlm;
use smbscout_protocols::smb::{self, status};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::SessionDialer;

/// Upper bound on interim `STATUS_PENDING` replies skipped per request.
const MAX_PENDING_REPLIES: usize = 8;

#[derive(Debug, Clone, Copy, Default)]
pub struct SmbDialer;

pub struct SmbSession {
    stream: TcpStream,
    peer: SocketAddr,
    next_message_id: u64,
    session_id: u64,
}

#[async_trait]
impl SessionDialer for SmbDialer {
    type Session = SmbSession;

    async fn dial(&self, addr: SocketAddr) -> std::io::Result<SmbSession> {
        let stream = TcpStream::connect(addr).await?;
        Ok(SmbSession::new(stream, addr))
    }

    async fn authenticate(
        &self,
        session: &mut SmbSession,
        credentials: &Credentials,
    ) -> anyhow::Result<()> {
        session.negotiate().await?;
        session.login(credentials).await
    }

    async fn close(&self, session: &mut SmbSession) {
        session.logoff().await;
    }
}

impl SmbSession {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            stream,
            peer,
            next_message_id: 0,
            session_id: 0,
        }
    }

    async fn negotiate(&mut self) -> anyhow::Result<()> {
        let client_guid: [u8; 16] = rand::random();
        let request = smb::negotiate_request(self.take_message_id(), client_guid);
        let reply = self.exchange(&request).await.context("negotiate")?;
        let negotiated = smb::parse_negotiate_response(&reply)?;

        debug!(
            "{} negotiated SMB dialect 0x{:04x}",
            self.peer, negotiated.dialect
        );
        Ok(())
    }

    /// Two-leg NTLM session setup.
    async fn login(&mut self, credentials: &Credentials) -> anyhow::Result<()> {
        let first = self
            .session_setup(&ntlm::negotiate_message())
            .await
            .context("session setup (negotiate)")?;
        if first.status != status::MORE_PROCESSING_REQUIRED {
            bail!(
                "server refused NTLM negotiation with {}",
                status::name(first.status)
            );
        }
        self.session_id = first.session_id;

        let challenge = ntlm::parse_challenge(&first.security_blob)?;
        let client_challenge: [u8; 8] = rand::random();
        let authenticate =
            ntlm::authenticate_message(&challenge, credentials, client_challenge, filetime_now());

        let second = self
            .session_setup(&authenticate)
            .await
            .context("session setup (authenticate)")?;
        if second.status != status::SUCCESS {
            bail!("{}", status::name(second.status));
        }

        ensure!(
            !second.is_guest() || credentials.username.eq_ignore_ascii_case("guest"),
            "server mapped the credentials to a guest session"
        );
        ensure!(
            !second.is_anonymous() || credentials.username.is_empty(),
            "server granted an anonymous session"
        );
        Ok(())
    }

    async fn session_setup(&mut self, blob: &[u8]) -> anyhow::Result<smb::SessionSetupResponse> {
        let request = smb::session_setup_request(self.take_message_id(), self.session_id, blob);
        let reply = self.exchange(&request).await?;
        smb::parse_session_setup_response(&reply)
    }

    /// Best effort; the outcome is already decided.
    async fn logoff(&mut self) {
        let request = smb::logoff_request(self.take_message_id(), self.session_id);
        if let Err(e) = self.exchange(&request).await {
            debug!("Logoff from {} failed: {e:#}", self.peer);
        }
    }

    /// Sends one request and returns the final reply to it.
    async fn exchange(&mut self, request: &[u8]) -> anyhow::Result<Vec<u8>> {
        self.stream.write_all(&smb::frame(request)?).await?;

        for _ in 0..MAX_PENDING_REPLIES {
            let reply = self.read_message().await?;
            let header = smb::Smb2Header::decode(&reply)?;
            if header.status != status::PENDING {
                return Ok(reply);
            }
        }
        bail!("server kept answering STATUS_PENDING")
    }

    async fn read_message(&mut self) -> anyhow::Result<Vec<u8>> {
        let mut prefix = [0u8; smb::FRAME_HDR_LEN];
        self.stream
            .read_exact(&mut prefix)
            .await
            .context("connection closed before reply")?;

        let len: usize = smb::frame_len(prefix)?;
        ensure!(len >= smb::SMB2_HDR_LEN, "reply too short for an SMB2 header");

        let mut msg: Vec<u8> = vec![0u8; len];
        self.stream
            .read_exact(&mut msg)
            .await
            .context("connection closed mid-reply")?;
        Ok(msg)
    }

    fn take_message_id(&mut self) -> u64 {
        let id = self.next_message_id;
        self.next_message_id += 1;
        id
    }
}

fn filetime_now() -> u64 {
    let secs: u64 = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default();
    ntlm::filetime_from_unix(secs)
}
