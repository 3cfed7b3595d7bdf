//! NTLMSSP message codec with NTLMv2 responses.
//!
//! Only the three messages of a client-side exchange are covered:
//! NEGOTIATE (type 1), CHALLENGE (type 2) and AUTHENTICATE (type 3).
//! Messages are carried raw, without a SPNEGO wrapper.

use anyhow::{Context, ensure};
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;

use smbscout_common::config::Credentials;

pub const NTLMSSP_SIGNATURE: &[u8; 8] = b"NTLMSSP\0";

const NEGOTIATE_MESSAGE: u32 = 1;
const CHALLENGE_MESSAGE: u32 = 2;
const AUTHENTICATE_MESSAGE: u32 = 3;

const NEGOTIATE_HDR_LEN: usize = 32;
const CHALLENGE_HDR_LEN: usize = 48;
const AUTHENTICATE_HDR_LEN: usize = 64;

pub const NEGOTIATE_UNICODE: u32 = 0x0000_0001;
pub const REQUEST_TARGET: u32 = 0x0000_0004;
pub const NEGOTIATE_NTLM: u32 = 0x0000_0200;
pub const NEGOTIATE_ALWAYS_SIGN: u32 = 0x0000_8000;
pub const NEGOTIATE_EXTENDED_SESSIONSECURITY: u32 = 0x0008_0000;
pub const NEGOTIATE_TARGET_INFO: u32 = 0x0080_0000;
pub const NEGOTIATE_128: u32 = 0x2000_0000;
pub const NEGOTIATE_56: u32 = 0x8000_0000;

pub const CLIENT_FLAGS: u32 = NEGOTIATE_UNICODE
    | REQUEST_TARGET
    | NEGOTIATE_NTLM
    | NEGOTIATE_ALWAYS_SIGN
    | NEGOTIATE_EXTENDED_SESSIONSECURITY
    | NEGOTIATE_TARGET_INFO
    | NEGOTIATE_128
    | NEGOTIATE_56;

const MSV_AV_EOL: u16 = 0x0000;
const MSV_AV_TIMESTAMP: u16 = 0x0007;

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_EPOCH_OFFSET: u64 = 11_644_473_600;

type HmacMd5 = Hmac<Md5>;

/// What the server sent back in its CHALLENGE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub flags: u32,
    pub server_challenge: [u8; 8],
    pub target_info: Vec<u8>,
}

impl Challenge {
    /// The `MsvAvTimestamp` pair of the target info, if the server sent one.
    pub fn timestamp(&self) -> Option<u64> {
        av_pairs(&self.target_info)
            .find(|(id, _)| *id == MSV_AV_TIMESTAMP)
            .and_then(|(_, value)| value.try_into().ok())
            .map(u64::from_le_bytes)
    }
}

/// Fields of an AUTHENTICATE message, decoded from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticate {
    pub flags: u32,
    pub lm_response: Vec<u8>,
    pub nt_response: Vec<u8>,
    pub domain: String,
    pub username: String,
    pub workstation: String,
}

pub fn negotiate_message() -> Vec<u8> {
    let mut msg: Vec<u8> = Vec::with_capacity(NEGOTIATE_HDR_LEN);
    msg.extend_from_slice(NTLMSSP_SIGNATURE);
    msg.extend_from_slice(&NEGOTIATE_MESSAGE.to_le_bytes());
    msg.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
    // Empty domain and workstation fields.
    msg.extend_from_slice(&[0u8; 16]);
    msg
}

/// Finds and decodes a CHALLENGE message inside a security blob.
///
/// The blob may be the bare message or a SPNEGO token wrapping it.
pub fn parse_challenge(blob: &[u8]) -> anyhow::Result<Challenge> {
    let start: usize = find_signature(blob).context("no NTLMSSP message in security blob")?;
    let msg: &[u8] = &blob[start..];
    ensure!(msg.len() >= CHALLENGE_HDR_LEN, "challenge message truncated");

    let msg_type: u32 = read_u32(msg, 8);
    ensure!(
        msg_type == CHALLENGE_MESSAGE,
        "expected NTLM challenge, received message type {msg_type}"
    );

    let flags: u32 = read_u32(msg, 20);
    let mut server_challenge = [0u8; 8];
    server_challenge.copy_from_slice(&msg[24..32]);
    let target_info: Vec<u8> = read_field(msg, 40)
        .context("target info points outside the challenge message")?
        .to_vec();

    Ok(Challenge {
        flags,
        server_challenge,
        target_info,
    })
}

/// Builds the AUTHENTICATE message answering `challenge`.
///
/// `client_challenge` must be random per attempt; `now` is the current
/// time as a Windows FILETIME and is only used when the server did not
/// supply its own timestamp.
pub fn authenticate_message(
    challenge: &Challenge,
    credentials: &Credentials,
    client_challenge: [u8; 8],
    now: u64,
) -> Vec<u8> {
    let key: [u8; 16] = ntowf_v2(
        &credentials.password,
        &credentials.username,
        &credentials.domain,
    );
    let server_timestamp: Option<u64> = challenge.timestamp();
    let timestamp: u64 = server_timestamp.unwrap_or(now);

    let blob: Vec<u8> = client_blob(timestamp, client_challenge, &challenge.target_info);
    let nt_proof: [u8; 16] = nt_proof_str(&key, &challenge.server_challenge, &blob);

    let mut nt_response: Vec<u8> = Vec::with_capacity(16 + blob.len());
    nt_response.extend_from_slice(&nt_proof);
    nt_response.extend_from_slice(&blob);

    // A server-supplied timestamp means LMv2 must be sent as zeros.
    let lm_response: Vec<u8> = match server_timestamp {
        Some(_) => vec![0u8; 24],
        None => {
            let mut lm = hmac_md5(&key, &[&challenge.server_challenge, &client_challenge]).to_vec();
            lm.extend_from_slice(&client_challenge);
            lm
        }
    };

    let domain: Vec<u8> = utf16le(&credentials.domain);
    let username: Vec<u8> = utf16le(&credentials.username);
    let workstation: Vec<u8> = Vec::new();
    let flags: u32 = (challenge.flags & CLIENT_FLAGS) | NEGOTIATE_UNICODE;

    let payload: [&[u8]; 5] = [&domain, &username, &workstation, &lm_response, &nt_response];
    let mut offsets: [u32; 5] = [0; 5];
    let mut cursor: usize = AUTHENTICATE_HDR_LEN;
    for (slot, part) in offsets.iter_mut().zip(payload.iter()) {
        *slot = cursor as u32;
        cursor += part.len();
    }

    let mut msg: Vec<u8> = Vec::with_capacity(cursor);
    msg.extend_from_slice(NTLMSSP_SIGNATURE);
    msg.extend_from_slice(&AUTHENTICATE_MESSAGE.to_le_bytes());
    write_field(&mut msg, &lm_response, offsets[3]);
    write_field(&mut msg, &nt_response, offsets[4]);
    write_field(&mut msg, &domain, offsets[0]);
    write_field(&mut msg, &username, offsets[1]);
    write_field(&mut msg, &workstation, offsets[2]);
    // No encrypted session key: key exchange is never negotiated.
    write_field(&mut msg, &[], cursor as u32);
    msg.extend_from_slice(&flags.to_le_bytes());

    for part in payload {
        msg.extend_from_slice(part);
    }
    msg
}

/// Decodes an AUTHENTICATE message. Used by the server side of tests.
pub fn parse_authenticate(blob: &[u8]) -> anyhow::Result<Authenticate> {
    let start: usize = find_signature(blob).context("no NTLMSSP message in security blob")?;
    let msg: &[u8] = &blob[start..];
    ensure!(msg.len() >= AUTHENTICATE_HDR_LEN, "authenticate message truncated");
    ensure!(
        read_u32(msg, 8) == AUTHENTICATE_MESSAGE,
        "not an NTLM authenticate message"
    );

    let text = |offset: usize| -> anyhow::Result<String> {
        let raw: &[u8] = read_field(msg, offset).context("string field out of bounds")?;
        from_utf16le(raw)
    };

    Ok(Authenticate {
        lm_response: read_field(msg, 12).context("LM response out of bounds")?.to_vec(),
        nt_response: read_field(msg, 20).context("NT response out of bounds")?.to_vec(),
        domain: text(28)?,
        username: text(36)?,
        workstation: text(44)?,
        flags: read_u32(msg, 60),
    })
}

/// Builds a CHALLENGE message. Only used to stand in for a server in tests.
pub fn challenge_message(server_challenge: [u8; 8], target_info: &[u8]) -> Vec<u8> {
    let mut msg: Vec<u8> = Vec::with_capacity(CHALLENGE_HDR_LEN + target_info.len());
    msg.extend_from_slice(NTLMSSP_SIGNATURE);
    msg.extend_from_slice(&CHALLENGE_MESSAGE.to_le_bytes());
    write_field(&mut msg, &[], CHALLENGE_HDR_LEN as u32);
    msg.extend_from_slice(&CLIENT_FLAGS.to_le_bytes());
    msg.extend_from_slice(&server_challenge);
    msg.extend_from_slice(&[0u8; 8]);
    write_field(&mut msg, target_info, CHALLENGE_HDR_LEN as u32);
    msg.extend_from_slice(target_info);
    msg
}

/// MD4 of the UTF-16LE password.
pub fn nt_hash(password: &str) -> [u8; 16] {
    Md4::digest(utf16le(password)).into()
}

/// The NTLMv2 response key: `HMAC-MD5(NT hash, UPPER(user) || domain)`.
pub fn ntowf_v2(password: &str, username: &str, domain: &str) -> [u8; 16] {
    let identity: Vec<u8> = utf16le(&format!("{}{}", username.to_uppercase(), domain));
    hmac_md5(&nt_hash(password), &[&identity])
}

pub fn nt_proof_str(key: &[u8; 16], server_challenge: &[u8; 8], blob: &[u8]) -> [u8; 16] {
    hmac_md5(key, &[server_challenge, blob])
}

/// Converts a UNIX timestamp in seconds to a Windows FILETIME.
pub fn filetime_from_unix(secs: u64) -> u64 {
    (secs + FILETIME_EPOCH_OFFSET) * 10_000_000
}

fn client_blob(timestamp: u64, client_challenge: [u8; 8], target_info: &[u8]) -> Vec<u8> {
    let mut blob: Vec<u8> = Vec::with_capacity(32 + target_info.len());
    blob.extend_from_slice(&[0x01, 0x01, 0, 0, 0, 0, 0, 0]);
    blob.extend_from_slice(&timestamp.to_le_bytes());
    blob.extend_from_slice(&client_challenge);
    blob.extend_from_slice(&[0u8; 4]);
    blob.extend_from_slice(target_info);
    blob.extend_from_slice(&[0u8; 4]);
    blob
}

fn hmac_md5(key: &[u8], parts: &[&[u8]]) -> [u8; 16] {
    // HMAC accepts keys of any length.
    let mut mac = <HmacMd5 as Mac>::new_from_slice(key).expect("HMAC takes keys of any size");
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

fn av_pairs(target_info: &[u8]) -> impl Iterator<Item = (u16, &[u8])> {
    let mut cursor: usize = 0;
    std::iter::from_fn(move || {
        if cursor + 4 > target_info.len() {
            return None;
        }
        let id: u16 = read_u16(target_info, cursor);
        let len: usize = read_u16(target_info, cursor + 2) as usize;
        cursor += 4;
        if id == MSV_AV_EOL || cursor + len > target_info.len() {
            return None;
        }
        let value: &[u8] = &target_info[cursor..cursor + len];
        cursor += len;
        Some((id, value))
    })
}

fn find_signature(blob: &[u8]) -> Option<usize> {
    blob.windows(NTLMSSP_SIGNATURE.len())
        .position(|window| window == NTLMSSP_SIGNATURE)
}

/// Reads a `(len, max_len, offset)` security buffer descriptor.
fn read_field(msg: &[u8], at: usize) -> Option<&[u8]> {
    let len: usize = read_u16(msg, at) as usize;
    let offset: usize = read_u32(msg, at + 4) as usize;
    msg.get(offset..offset.checked_add(len)?)
}

fn write_field(msg: &mut Vec<u8>, data: &[u8], offset: u32) {
    let len: u16 = data.len() as u16;
    msg.extend_from_slice(&len.to_le_bytes());
    msg.extend_from_slice(&len.to_le_bytes());
    msg.extend_from_slice(&offset.to_le_bytes());
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn utf16le(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

fn from_utf16le(raw: &[u8]) -> anyhow::Result<String> {
    ensure!(raw.len() % 2 == 0, "odd-length UTF-16 string");
    let units: Vec<u16> = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16(&units).context("invalid UTF-16 string")
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
