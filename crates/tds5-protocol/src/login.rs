//! TDS 5.0 login record.
//!
//! Unlike TDS 7.x, the 5.0 login is a fixed-layout record of padded
//! string fields followed by a capability request token. Field widths
//! come from the protocol, not from this client.

use bytes::{BufMut, BytesMut};

use crate::codec::write_login_field;
use crate::token::{Capability, TdsVersion};

/// Version bytes reported as the client library version.
const PROG_VERSION: [u8; 4] = [1, 0, 0, 0];

/// Login record for establishing a TDS 5.0 session.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    /// Client host name.
    pub hostname: String,
    /// Login user name.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Client process identifier, as a decimal string.
    pub host_process: String,
    /// Application name reported to the server.
    pub app_name: String,
    /// Server name the client believes it is talking to.
    pub server_name: String,
    /// Client library name.
    pub lib_name: String,
    /// Session language.
    pub language: String,
    /// Session character set.
    pub char_set: String,
    /// Requested packet size in bytes.
    pub packet_size: u32,
}

impl LoginRequest {
    /// Encode the login record followed by the capability request
    /// token into `dst`.
    pub fn encode(&self, dst: &mut BytesMut) {
        write_login_field(dst, &self.hostname, 30);
        write_login_field(dst, &self.username, 30);
        write_login_field(dst, &self.password, 30);
        write_login_field(dst, &self.host_process, 30);

        // int2/int4/char/float/date representations, notify on use-db.
        dst.put_slice(&[0x03, 0x01, 0x06, 0x0A, 0x09, 0x01]);
        // bulk copy allowed
        dst.put_u8(0x01);
        dst.put_bytes(0, 3);

        write_login_field(dst, &self.app_name, 30);
        write_login_field(dst, &self.server_name, 30);

        // Remote password field: one empty server-name slot, then the
        // password, zero-padded to 253 bytes, with a trailing length.
        let password = self.password.as_bytes();
        let len = password.len().min(253);
        dst.put_u8(0);
        dst.put_u8(len as u8);
        dst.put_slice(&password[..len]);
        dst.put_bytes(0, 253 - len);
        dst.put_u8(len as u8 + 2);

        dst.put_slice(&TdsVersion::V5_0.0);
        write_login_field(dst, &self.lib_name, 10);
        dst.put_slice(&PROG_VERSION);

        // no short conversions, float4/date4 representations
        dst.put_slice(&[0x00, 0x0D, 0x11]);

        write_login_field(dst, &self.language, 30);
        // notify on language change
        dst.put_u8(0x01);
        // security label hierarchy, components, spare, login role
        dst.put_bytes(0, 2 + 8 + 2 + 1);

        write_login_field(dst, &self.char_set, 30);
        // notify on charset change
        dst.put_u8(0x01);

        write_login_field(dst, &self.packet_size.to_string(), 6);
        dst.put_bytes(0, 4);

        Capability::request_default().encode(dst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> LoginRequest {
        LoginRequest {
            hostname: "client1".to_string(),
            username: "sa".to_string(),
            password: "secret".to_string(),
            host_process: "4242".to_string(),
            app_name: "app".to_string(),
            server_name: "SYBASE".to_string(),
            lib_name: "tds5".to_string(),
            language: "us_english".to_string(),
            char_set: "utf8".to_string(),
            packet_size: 512,
        }
    }

    #[test]
    fn record_starts_with_padded_hostname() {
        let mut buf = BytesMut::new();
        request().encode(&mut buf);
        assert_eq!(&buf[..7], b"client1");
        assert_eq!(buf[30], 7);
    }

    #[test]
    fn record_ends_with_capability_token() {
        let mut buf = BytesMut::new();
        request().encode(&mut buf);
        let cap = Capability::request_default();
        // id + u16 length + block type + block length + mask
        let cap_len = 3 + 2 + cap.request.len();
        assert_eq!(buf[buf.len() - cap_len], 0xE2);
    }

    #[test]
    fn record_length_is_independent_of_field_values() {
        let mut short = BytesMut::new();
        request().encode(&mut short);

        let mut long_fields = request();
        long_fields.username = "a-much-longer-username".to_string();
        long_fields.app_name = "another-application".to_string();
        let mut long = BytesMut::new();
        long_fields.encode(&mut long);

        assert_eq!(short.len(), long.len());
    }
}
