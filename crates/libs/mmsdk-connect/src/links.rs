//! Connection link encoding.
//!
//! A universal link and a deeplink carry the same query string; only the
//! scheme and host differ. Structured payloads (`originatorInfo`, `rpc`) are
//! JSON encoded as standard base64 before URL encoding.

use crate::config::CommunicationLayerPreference;
use crate::constants::{LINK_PROTOCOL_VERSION, METAMASK_CONNECT_BASE_URL, METAMASK_DEEPLINK_BASE};
use crate::error::SdkError;
use crate::provider::RequestArguments;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::form_urlencoded;
use url::Url;

/// Who is asking to connect, as shown to the wallet user.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OriginatorInfo {
    pub url: Option<String>,
    pub title: Option<String>,
    pub icon: Option<String>,
    pub dapp_id: Option<String>,
    pub platform: String,
    pub source: Option<String>,
    pub api_version: String,
    pub anon_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LinkParams {
    pub channel_id: String,
    pub comm: CommunicationLayerPreference,
    pub pubkey: String,
    pub version: u8,
    pub originator_info: Option<OriginatorInfo>,
    pub rpc: Option<RequestArguments>,
}

impl LinkParams {
    pub fn new(
        channel_id: impl Into<String>,
        comm: CommunicationLayerPreference,
        pubkey: impl Into<String>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            comm,
            pubkey: pubkey.into(),
            version: LINK_PROTOCOL_VERSION,
            originator_info: None,
            rpc: None,
        }
    }

    pub fn with_originator_info(mut self, info: OriginatorInfo) -> Self {
        self.originator_info = Some(info);
        self
    }

    pub fn with_rpc(mut self, rpc: Option<RequestArguments>) -> Self {
        self.rpc = rpc;
        self
    }

    /// URL-encoded query string shared by both link formats.
    pub fn encode(&self) -> Result<String, SdkError> {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query
            .append_pair("channelId", &self.channel_id)
            .append_pair("comm", self.comm.as_str())
            .append_pair("pubkey", &self.pubkey)
            .append_pair("v", &self.version.to_string());
        if let Some(info) = &self.originator_info {
            query.append_pair("originatorInfo", &encode_payload(info)?);
        }
        if let Some(rpc) = &self.rpc {
            query.append_pair("rpc", &encode_payload(rpc)?);
        }
        Ok(query.finish())
    }

    pub fn decode(query: &str) -> Result<Self, SdkError> {
        let mut channel_id = None;
        let mut comm = None;
        let mut pubkey = None;
        let mut version = LINK_PROTOCOL_VERSION;
        let mut originator_info = None;
        let mut rpc = None;

        for (key, value) in form_urlencoded::parse(query.trim_start_matches('?').as_bytes()) {
            match key.as_ref() {
                "channelId" => channel_id = Some(value.into_owned()),
                "comm" => {
                    comm = Some(CommunicationLayerPreference::parse(&value).ok_or_else(|| {
                        SdkError::config(format!("unknown communication layer '{value}'"))
                    })?)
                }
                "pubkey" => pubkey = Some(value.into_owned()),
                "v" => {
                    version = value
                        .parse()
                        .map_err(|_| SdkError::config(format!("invalid link version '{value}'")))?
                }
                "originatorInfo" => originator_info = Some(decode_payload(&value)?),
                "rpc" => rpc = Some(decode_payload(&value)?),
                other => log::trace!("ignoring unknown link parameter {other}"),
            }
        }

        Ok(Self {
            channel_id: channel_id
                .ok_or_else(|| SdkError::config("link is missing channelId"))?,
            comm: comm.unwrap_or_default(),
            pubkey: pubkey.unwrap_or_default(),
            version,
            originator_info,
            rpc,
        })
    }

    /// Parses either link format back into its parameters.
    pub fn from_link(link: &str) -> Result<Self, SdkError> {
        let parsed =
            Url::parse(link).map_err(|err| SdkError::config(format!("invalid link: {err}")))?;
        Self::decode(parsed.query().unwrap_or_default())
    }
}

fn encode_payload<T: Serialize>(value: &T) -> Result<String, SdkError> {
    let json = serde_json::to_vec(value).map_err(|err| SdkError::internal(err.to_string()))?;
    Ok(BASE64.encode(json))
}

fn decode_payload<T: DeserializeOwned>(value: &str) -> Result<T, SdkError> {
    let bytes = BASE64
        .decode(value)
        .map_err(|err| SdkError::config(format!("invalid base64 link payload: {err}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|err| SdkError::config(format!("invalid link payload: {err}")))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionLinks {
    pub universal_link: String,
    pub deeplink: String,
}

impl ConnectionLinks {
    pub fn build(params: &LinkParams) -> Result<Self, SdkError> {
        let query = params.encode()?;
        Ok(Self {
            universal_link: format!("{METAMASK_CONNECT_BASE_URL}?{query}"),
            deeplink: format!("{METAMASK_DEEPLINK_BASE}?{query}"),
        })
    }

    /// The link rendered in a QR code.
    pub fn qrcode_link(&self, use_deeplink: bool) -> &str {
        if use_deeplink {
            &self.deeplink
        } else {
            &self.universal_link
        }
    }
}
