//! SMB2 message codec.
//!
//! Covers what a single authentication attempt needs over direct TCP
//! (port 445): NEGOTIATE, SESSION_SETUP and LOGOFF. No I/O happens here;
//! callers frame, send and read the bytes themselves.

use anyhow::{Context, bail, ensure};

pub const SMB2_MAGIC: [u8; 4] = [0xFE, b'S', b'M', b'B'];
pub const SMB2_HDR_LEN: usize = 64;
pub const FRAME_HDR_LEN: usize = 4;
pub const MAX_FRAME_LEN: usize = 0x00FF_FFFF;

pub const DIALECTS: [u16; 4] = [0x0202, 0x0210, 0x0300, 0x0302];

const FLAGS_SERVER_TO_REDIR: u32 = 0x0000_0001;
const SIGNING_ENABLED: u16 = 0x0001;
const CREDITS_REQUESTED: u16 = 31;

const NEGOTIATE_REQ_SIZE: u16 = 36;
const NEGOTIATE_RESP_SIZE: u16 = 65;
const SESSION_SETUP_REQ_SIZE: u16 = 25;
const SESSION_SETUP_RESP_SIZE: u16 = 9;
const SESSION_SETUP_FIXED_LEN: usize = 24;
const LOGOFF_SIZE: u16 = 4;

pub const SESSION_FLAG_IS_GUEST: u16 = 0x0001;
pub const SESSION_FLAG_IS_NULL: u16 = 0x0002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    Negotiate = 0x0000,
    SessionSetup = 0x0001,
    Logoff = 0x0002,
}

impl TryFrom<u16> for Command {
    type Error = anyhow::Error;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0000 => Ok(Command::Negotiate),
            0x0001 => Ok(Command::SessionSetup),
            0x0002 => Ok(Command::Logoff),
            other => bail!("unsupported SMB2 command 0x{other:04x}"),
        }
    }
}

/// NT status codes a session setup can end with.
pub mod status {
    pub const SUCCESS: u32 = 0x0000_0000;
    pub const PENDING: u32 = 0x0000_0103;
    pub const MORE_PROCESSING_REQUIRED: u32 = 0xC000_0016;
    pub const ACCESS_DENIED: u32 = 0xC000_0022;
    pub const LOGON_FAILURE: u32 = 0xC000_006D;
    pub const ACCOUNT_RESTRICTION: u32 = 0xC000_006E;
    pub const PASSWORD_EXPIRED: u32 = 0xC000_0071;
    pub const ACCOUNT_DISABLED: u32 = 0xC000_0072;
    pub const NOT_SUPPORTED: u32 = 0xC000_00BB;
    pub const ACCOUNT_LOCKED_OUT: u32 = 0xC000_0234;

    pub fn name(code: u32) -> String {
        let known: &str = match code {
            SUCCESS => "STATUS_SUCCESS",
            PENDING => "STATUS_PENDING",
            MORE_PROCESSING_REQUIRED => "STATUS_MORE_PROCESSING_REQUIRED",
            ACCESS_DENIED => "STATUS_ACCESS_DENIED",
            LOGON_FAILURE => "STATUS_LOGON_FAILURE",
            ACCOUNT_RESTRICTION => "STATUS_ACCOUNT_RESTRICTION",
            PASSWORD_EXPIRED => "STATUS_PASSWORD_EXPIRED",
            ACCOUNT_DISABLED => "STATUS_ACCOUNT_DISABLED",
            NOT_SUPPORTED => "STATUS_NOT_SUPPORTED",
            ACCOUNT_LOCKED_OUT => "STATUS_ACCOUNT_LOCKED_OUT",
            _ => return format!("NTSTATUS 0x{code:08x}"),
        };
        known.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Smb2Header {
    pub command: Command,
    pub status: u32,
    pub flags: u32,
    pub message_id: u64,
    pub session_id: u64,
}

impl Smb2Header {
    pub fn request(command: Command, message_id: u64, session_id: u64) -> Self {
        Self {
            command,
            status: status::SUCCESS,
            flags: 0,
            message_id,
            session_id,
        }
    }

    pub fn response(command: Command, status: u32, message_id: u64, session_id: u64) -> Self {
        Self {
            command,
            status,
            flags: FLAGS_SERVER_TO_REDIR,
            message_id,
            session_id,
        }
    }

    pub fn is_response(&self) -> bool {
        self.flags & FLAGS_SERVER_TO_REDIR != 0
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&SMB2_MAGIC);
        out.extend_from_slice(&(SMB2_HDR_LEN as u16).to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes()); // credit charge
        out.extend_from_slice(&self.status.to_le_bytes());
        out.extend_from_slice(&(self.command as u16).to_le_bytes());
        out.extend_from_slice(&CREDITS_REQUESTED.to_le_bytes());
        out.extend_from_slice(&self.flags.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // next command
        out.extend_from_slice(&self.message_id.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes()); // process id
        out.extend_from_slice(&0u32.to_le_bytes()); // tree id
        out.extend_from_slice(&self.session_id.to_le_bytes());
        out.extend_from_slice(&[0u8; 16]); // signature
    }

    pub fn decode(msg: &[u8]) -> anyhow::Result<Self> {
        ensure!(msg.len() >= SMB2_HDR_LEN, "SMB2 header truncated ({} bytes)", msg.len());
        if msg[..4] != SMB2_MAGIC {
            if msg[..4] == [0xFF, b'S', b'M', b'B'] {
                bail!("server answered with SMB1, which is not supported");
            }
            bail!("not an SMB2 message");
        }

        Ok(Self {
            status: read_u32(msg, 8),
            command: Command::try_from(read_u16(msg, 12))?,
            flags: read_u32(msg, 16),
            message_id: read_u64(msg, 24),
            session_id: read_u64(msg, 40),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NegotiateResponse {
    pub security_mode: u16,
    pub dialect: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetupResponse {
    pub status: u32,
    pub session_id: u64,
    pub session_flags: u16,
    pub security_blob: Vec<u8>,
}

impl SessionSetupResponse {
    pub fn is_guest(&self) -> bool {
        self.session_flags & SESSION_FLAG_IS_GUEST != 0
    }

    pub fn is_anonymous(&self) -> bool {
        self.session_flags & SESSION_FLAG_IS_NULL != 0
    }
}

/// Prepends the 4-byte direct-TCP transport header.
pub fn frame(msg: &[u8]) -> anyhow::Result<Vec<u8>> {
    ensure!(msg.len() <= MAX_FRAME_LEN, "SMB2 message too large to frame");
    let len: [u8; 4] = (msg.len() as u32).to_be_bytes();
    let mut framed: Vec<u8> = Vec::with_capacity(FRAME_HDR_LEN + msg.len());
    framed.push(0x00);
    framed.extend_from_slice(&len[1..]);
    framed.extend_from_slice(msg);
    Ok(framed)
}

/// Length of the message following a direct-TCP transport header.
pub fn frame_len(prefix: [u8; FRAME_HDR_LEN]) -> anyhow::Result<usize> {
    ensure!(prefix[0] == 0x00, "unexpected transport frame type 0x{:02x}", prefix[0]);
    Ok(u32::from_be_bytes([0, prefix[1], prefix[2], prefix[3]]) as usize)
}

pub fn negotiate_request(message_id: u64, client_guid: [u8; 16]) -> Vec<u8> {
    let mut msg: Vec<u8> = Vec::with_capacity(SMB2_HDR_LEN + 36 + DIALECTS.len() * 2);
    Smb2Header::request(Command::Negotiate, message_id, 0).encode(&mut msg);

    msg.extend_from_slice(&NEGOTIATE_REQ_SIZE.to_le_bytes());
    msg.extend_from_slice(&(DIALECTS.len() as u16).to_le_bytes());
    msg.extend_from_slice(&SIGNING_ENABLED.to_le_bytes());
    msg.extend_from_slice(&0u16.to_le_bytes()); // reserved
    msg.extend_from_slice(&0u32.to_le_bytes()); // capabilities
    msg.extend_from_slice(&client_guid);
    msg.extend_from_slice(&0u64.to_le_bytes()); // client start time
    for dialect in DIALECTS {
        msg.extend_from_slice(&dialect.to_le_bytes());
    }
    msg
}

pub fn parse_negotiate_response(msg: &[u8]) -> anyhow::Result<NegotiateResponse> {
    let header = Smb2Header::decode(msg)?;
    ensure!(
        header.command == Command::Negotiate && header.is_response(),
        "expected a negotiate response"
    );
    if header.status != status::SUCCESS {
        bail!("negotiate failed with {}", status::name(header.status));
    }

    let body: &[u8] = msg.get(SMB2_HDR_LEN..).context("negotiate response has no body")?;
    ensure!(body.len() >= 6, "negotiate response body truncated");
    ensure!(
        read_u16(body, 0) == NEGOTIATE_RESP_SIZE,
        "malformed negotiate response"
    );

    let dialect: u16 = read_u16(body, 4);
    ensure!(
        DIALECTS.contains(&dialect),
        "server selected unsupported dialect 0x{dialect:04x}"
    );

    Ok(NegotiateResponse {
        security_mode: read_u16(body, 2),
        dialect,
    })
}

pub fn session_setup_request(message_id: u64, session_id: u64, security_blob: &[u8]) -> Vec<u8> {
    let mut msg: Vec<u8> =
        Vec::with_capacity(SMB2_HDR_LEN + SESSION_SETUP_FIXED_LEN + security_blob.len());
    Smb2Header::request(Command::SessionSetup, message_id, session_id).encode(&mut msg);

    let blob_offset: u16 = (SMB2_HDR_LEN + SESSION_SETUP_FIXED_LEN) as u16;
    msg.extend_from_slice(&SESSION_SETUP_REQ_SIZE.to_le_bytes());
    msg.push(0); // flags
    msg.push(SIGNING_ENABLED as u8);
    msg.extend_from_slice(&0u32.to_le_bytes()); // capabilities
    msg.extend_from_slice(&0u32.to_le_bytes()); // channel
    msg.extend_from_slice(&blob_offset.to_le_bytes());
    msg.extend_from_slice(&(security_blob.len() as u16).to_le_bytes());
    msg.extend_from_slice(&0u64.to_le_bytes()); // previous session id
    msg.extend_from_slice(security_blob);
    msg
}

/// Decodes a session setup response.
///
/// Error statuses carry an error body instead of a session setup body,
/// so only the header is read for them.
pub fn parse_session_setup_response(msg: &[u8]) -> anyhow::Result<SessionSetupResponse> {
    let header = Smb2Header::decode(msg)?;
    ensure!(
        header.command == Command::SessionSetup && header.is_response(),
        "expected a session setup response"
    );

    let mut response = SessionSetupResponse {
        status: header.status,
        session_id: header.session_id,
        session_flags: 0,
        security_blob: Vec::new(),
    };

    if header.status != status::SUCCESS && header.status != status::MORE_PROCESSING_REQUIRED {
        return Ok(response);
    }

    let body: &[u8] = msg.get(SMB2_HDR_LEN..).context("session setup response has no body")?;
    ensure!(body.len() >= 8, "session setup response body truncated");
    ensure!(
        read_u16(body, 0) == SESSION_SETUP_RESP_SIZE,
        "malformed session setup response"
    );

    response.session_flags = read_u16(body, 2);
    let offset: usize = read_u16(body, 4) as usize;
    let len: usize = read_u16(body, 6) as usize;
    if len > 0 {
        response.security_blob = msg
            .get(offset..offset + len)
            .context("security blob points outside the message")?
            .to_vec();
    }

    Ok(response)
}

pub fn logoff_request(message_id: u64, session_id: u64) -> Vec<u8> {
    let mut msg: Vec<u8> = Vec::with_capacity(SMB2_HDR_LEN + 4);
    Smb2Header::request(Command::Logoff, message_id, session_id).encode(&mut msg);
    msg.extend_from_slice(&LOGOFF_SIZE.to_le_bytes());
    msg.extend_from_slice(&0u16.to_le_bytes());
    msg
}

/// Builds a server reply. Only used to stand in for a server in tests.
pub fn negotiate_response(message_id: u64, dialect: u16) -> Vec<u8> {
    let mut msg: Vec<u8> = Vec::with_capacity(SMB2_HDR_LEN + 64);
    Smb2Header::response(Command::Negotiate, status::SUCCESS, message_id, 0).encode(&mut msg);
    msg.extend_from_slice(&NEGOTIATE_RESP_SIZE.to_le_bytes());
    msg.extend_from_slice(&SIGNING_ENABLED.to_le_bytes());
    msg.extend_from_slice(&dialect.to_le_bytes());
    msg.extend_from_slice(&0u16.to_le_bytes()); // negotiate context count
    msg.extend_from_slice(&[0u8; 16]); // server guid
    msg.extend_from_slice(&0u32.to_le_bytes()); // capabilities
    msg.extend_from_slice(&65_536u32.to_le_bytes()); // max transact
    msg.extend_from_slice(&65_536u32.to_le_bytes()); // max read
    msg.extend_from_slice(&65_536u32.to_le_bytes()); // max write
    msg.extend_from_slice(&0u64.to_le_bytes()); // system time
    msg.extend_from_slice(&0u64.to_le_bytes()); // server start time
    msg.extend_from_slice(&0u16.to_le_bytes()); // security buffer offset
    msg.extend_from_slice(&0u16.to_le_bytes()); // security buffer length
    msg.extend_from_slice(&0u32.to_le_bytes()); // negotiate context offset
    msg
}

/// Builds a server reply. Only used to stand in for a server in tests.
pub fn session_setup_response(
    status: u32,
    message_id: u64,
    session_id: u64,
    session_flags: u16,
    security_blob: &[u8],
) -> Vec<u8> {
    let mut msg: Vec<u8> = Vec::with_capacity(SMB2_HDR_LEN + 8 + security_blob.len());
    Smb2Header::response(Command::SessionSetup, status, message_id, session_id).encode(&mut msg);

    if status != self::status::SUCCESS && status != self::status::MORE_PROCESSING_REQUIRED {
        // SMB2 ERROR response body.
        msg.extend_from_slice(&9u16.to_le_bytes());
        msg.extend_from_slice(&[0u8; 6]);
        msg.push(0);
        return msg;
    }

    let blob_offset: u16 = (SMB2_HDR_LEN + 8) as u16;
    msg.extend_from_slice(&SESSION_SETUP_RESP_SIZE.to_le_bytes());
    msg.extend_from_slice(&session_flags.to_le_bytes());
    msg.extend_from_slice(&blob_offset.to_le_bytes());
    msg.extend_from_slice(&(security_blob.len() as u16).to_le_bytes());
    msg.extend_from_slice(security_blob);
    msg
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_prefix_is_big_endian_24_bit_length() {
        let framed = frame(&[0xAB; 300]).unwrap();
        assert_eq!(&framed[..4], &[0x00, 0x00, 0x01, 0x2C]);
        assert_eq!(frame_len([framed[0], framed[1], framed[2], framed[3]]).unwrap(), 300);
        assert!(frame_len([0x85, 0, 0, 0]).is_err());
    }

    #[test]
    fn negotiate_request_layout() {
        let msg = negotiate_request(0, [7u8; 16]);
        assert_eq!(msg.len(), SMB2_HDR_LEN + 36 + 8);
        assert_eq!(&msg[..4], &SMB2_MAGIC);

        let header = Smb2Header::decode(&msg).unwrap();
        assert_eq!(header.command, Command::Negotiate);
        assert!(!header.is_response());

        let body = &msg[SMB2_HDR_LEN..];
        assert_eq!(read_u16(body, 0), 36);
        assert_eq!(read_u16(body, 2), DIALECTS.len() as u16);
        assert_eq!(&body[12..28], &[7u8; 16]);
        assert_eq!(read_u16(body, 36), 0x0202);
        assert_eq!(read_u16(body, 42), 0x0302);
    }

    #[test]
    fn negotiate_response_is_understood() {
        let resp = parse_negotiate_response(&negotiate_response(0, 0x0210)).unwrap();
        assert_eq!(resp.dialect, 0x0210);
        assert_eq!(resp.security_mode, SIGNING_ENABLED);
    }

    #[test]
    fn negotiate_response_rejects_smb1_and_requests() {
        let mut smb1 = vec![0xFF, b'S', b'M', b'B'];
        smb1.resize(SMB2_HDR_LEN + 8, 0);
        let err = parse_negotiate_response(&smb1).unwrap_err();
        assert!(err.to_string().contains("SMB1"));

        assert!(parse_negotiate_response(&negotiate_request(0, [0; 16])).is_err());
    }

    #[test]
    fn session_setup_request_points_at_blob() {
        let blob = b"NTLMSSP\0payload";
        let msg = session_setup_request(2, 0x1122, blob);
        let body = &msg[SMB2_HDR_LEN..];

        assert_eq!(read_u16(body, 0), 25);
        let offset = read_u16(body, 12) as usize;
        let len = read_u16(body, 14) as usize;
        assert_eq!(&msg[offset..offset + len], blob);

        let header = Smb2Header::decode(&msg).unwrap();
        assert_eq!(header.message_id, 2);
        assert_eq!(header.session_id, 0x1122);
    }

    #[test]
    fn session_setup_response_extracts_blob_and_flags() {
        let raw = session_setup_response(
            status::MORE_PROCESSING_REQUIRED,
            1,
            0xdead_beef,
            SESSION_FLAG_IS_GUEST,
            b"challenge",
        );
        let resp = parse_session_setup_response(&raw).unwrap();
        assert_eq!(resp.status, status::MORE_PROCESSING_REQUIRED);
        assert_eq!(resp.session_id, 0xdead_beef);
        assert_eq!(resp.security_blob, b"challenge");
        assert!(resp.is_guest());
    }

    #[test]
    fn session_setup_error_reads_header_only() {
        let raw = session_setup_response(status::LOGON_FAILURE, 2, 9, 0, &[]);
        let resp = parse_session_setup_response(&raw).unwrap();
        assert_eq!(resp.status, status::LOGON_FAILURE);
        assert!(resp.security_blob.is_empty());
        assert_eq!(status::name(resp.status), "STATUS_LOGON_FAILURE");
        assert_eq!(status::name(0xC000_9999), "NTSTATUS 0xc0009999");
    }
}
