#![cfg(test)]
//! A minimal SMB2 server that knows a single account.
//!
//! It answers NEGOTIATE, both SESSION_SETUP legs and LOGOFF, and checks the
//! client's NTLMv2 proof against the account's password. Started with
//! [`FakeSmbServer::ignoring_logoff`] it reads LOGOFF and never replies.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Context;
use smbscout_protocols::ntlm;
use smbscout_protocols::smb::{self, Command, Smb2Header, status};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const SESSION_ID: u64 = 0x0000_4000_0000_0011;
const SERVER_CHALLENGE: [u8; 8] = [0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88];
const DIALECT: u16 = 0x0210;

#[derive(Debug, Clone)]
pub struct Account {
    pub domain: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
struct Behaviour {
    account: Account,
    answer_logoff: bool,
}

pub struct FakeSmbServer {
    addr: SocketAddr,
    authenticates: Arc<AtomicUsize>,
    handle: JoinHandle<()>,
}

impl FakeSmbServer {
    pub async fn start(account: Account) -> Self {
        Self::spawn(Behaviour {
            account,
            answer_logoff: true,
        })
        .await
    }

    /// Accepts logins like [`FakeSmbServer::start`] but leaves LOGOFF
    /// unanswered, holding the connection open.
    pub async fn ignoring_logoff(account: Account) -> Self {
        Self::spawn(Behaviour {
            account,
            answer_logoff: false,
        })
        .await
    }

    async fn spawn(behaviour: Behaviour) -> Self {
        let listener = TcpListener::bind((IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let authenticates = Arc::new(AtomicUsize::new(0));
        let behaviour = Arc::new(behaviour);

        let counter = authenticates.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let behaviour = behaviour.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, &behaviour, &counter).await;
                });
            }
        });

        Self {
            addr,
            authenticates,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// AUTHENTICATE messages received so far, across all connections.
    pub fn authenticate_count(&self) -> usize {
        self.authenticates.load(Ordering::SeqCst)
    }
}

impl Drop for FakeSmbServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(
    mut stream: TcpStream,
    behaviour: &Behaviour,
    authenticates: &AtomicUsize,
) -> anyhow::Result<()> {
    while let Some(msg) = read_message(&mut stream).await? {
        let header = Smb2Header::decode(&msg)?;

        let reply: Vec<u8> = match header.command {
            Command::Negotiate => smb::negotiate_response(header.message_id, DIALECT),
            Command::SessionSetup if header.session_id == 0 => {
                let challenge = ntlm::challenge_message(SERVER_CHALLENGE, &[0u8; 4]);
                smb::session_setup_response(
                    status::MORE_PROCESSING_REQUIRED,
                    header.message_id,
                    SESSION_ID,
                    0,
                    &challenge,
                )
            }
            Command::SessionSetup => {
                authenticates.fetch_add(1, Ordering::SeqCst);
                let verdict = match verify(&behaviour.account, &msg) {
                    Ok(true) => status::SUCCESS,
                    _ => status::LOGON_FAILURE,
                };
                smb::session_setup_response(verdict, header.message_id, SESSION_ID, 0, &[])
            }
            Command::Logoff if !behaviour.answer_logoff => {
                std::future::pending::<()>().await;
                continue;
            }
            Command::Logoff => {
                let mut reply: Vec<u8> = Vec::new();
                Smb2Header::response(Command::Logoff, status::SUCCESS, header.message_id, SESSION_ID)
                    .encode(&mut reply);
                reply.extend_from_slice(&[4, 0, 0, 0]);
                reply
            }
        };

        stream.write_all(&smb::frame(&reply)?).await?;
    }
    Ok(())
}

/// Recomputes the NTLMv2 proof the way a domain controller would.
fn verify(account: &Account, msg: &[u8]) -> anyhow::Result<bool> {
    let auth = ntlm::parse_authenticate(msg)?;
    if !auth.username.eq_ignore_ascii_case(&account.username)
        || !auth.domain.eq_ignore_ascii_case(&account.domain)
    {
        return Ok(false);
    }

    anyhow::ensure!(auth.nt_response.len() > 16, "NTLMv2 response too short");
    let (proof, blob) = auth.nt_response.split_at(16);
    let key = ntlm::ntowf_v2(&account.password, &auth.username, &auth.domain);
    Ok(proof == ntlm::nt_proof_str(&key, &SERVER_CHALLENGE, blob))
}

async fn read_message(stream: &mut TcpStream) -> anyhow::Result<Option<Vec<u8>>> {
    let mut prefix = [0u8; smb::FRAME_HDR_LEN];
    if stream.read_exact(&mut prefix).await.is_err() {
        return Ok(None);
    }
    let len = smb::frame_len(prefix)?;
    let mut msg = vec![0u8; len];
    stream.read_exact(&mut msg).await.context("truncated request")?;
    Ok(Some(msg))
}
