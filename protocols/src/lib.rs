//! Wire codecs for the authentication handshake.
//!
//! * [`smb`] - SMB2 NEGOTIATE, SESSION_SETUP and LOGOFF messages.
//! * [`ntlm`] - NTLMSSP messages and NTLMv2 response computation.

pub mod ntlm;
pub mod smb;
