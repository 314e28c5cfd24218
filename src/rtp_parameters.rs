//! Collection of RTP-related data structures that describe what an endpoint sends or what the
//! worker sends to an endpoint.


use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::num::{NonZeroU32, NonZeroU8};

/// Media kind.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio
    Audio,
    /// Video
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// MIME type of either media kind.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum MimeType {
    /// Audio
    Audio(MimeTypeAudio),
    /// Video
    Video(MimeTypeVideo),
}

impl MimeType {
    /// Media kind this MIME type belongs to.
    #[must_use]
    pub fn kind(self) -> MediaKind {
        match self {
            MimeType::Audio(_) => MediaKind::Audio,
            MimeType::Video(_) => MediaKind::Video,
        }
    }

    pub(crate) fn is_rtx(self) -> bool {
        matches!(
            self,
            MimeType::Audio(MimeTypeAudio::Rtx) | MimeType::Video(MimeTypeVideo::Rtx)
        )
    }

    /// Whether streams of this MIME type carry key frames the worker can recognize and anchor
    /// on. Audio codecs never do; video codecs only when a payload inspector exists for them.
    #[must_use]
    pub fn can_be_key_frame(self) -> bool {
        matches!(
            self,
            MimeType::Video(MimeTypeVideo::Vp8)
                | MimeType::Video(MimeTypeVideo::Vp9)
                | MimeType::Video(MimeTypeVideo::H264)
        )
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MimeType::Audio(mime_type) => fmt::Display::fmt(mime_type, f),
            MimeType::Video(mime_type) => fmt::Display::fmt(mime_type, f),
        }
    }
}

/// Audio MIME types the worker understands.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum MimeTypeAudio {
    /// Opus
    #[serde(rename = "audio/opus")]
    Opus,
    /// PCMU
    #[serde(rename = "audio/PCMU")]
    Pcmu,
    /// PCMA
    #[serde(rename = "audio/PCMA")]
    Pcma,
    /// G722
    #[serde(rename = "audio/G722")]
    G722,
    /// RTX
    #[serde(rename = "audio/rtx")]
    Rtx,
}

impl fmt::Display for MimeTypeAudio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MimeTypeAudio::Opus => f.write_str("audio/opus"),
            MimeTypeAudio::Pcmu => f.write_str("audio/PCMU"),
            MimeTypeAudio::Pcma => f.write_str("audio/PCMA"),
            MimeTypeAudio::G722 => f.write_str("audio/G722"),
            MimeTypeAudio::Rtx => f.write_str("audio/rtx"),
        }
    }
}

/// Video MIME types the worker understands.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub enum MimeTypeVideo {
    /// VP8
    #[serde(rename = "video/VP8")]
    Vp8,
    /// VP9
    #[serde(rename = "video/VP9")]
    Vp9,
    /// H264
    #[serde(rename = "video/H264")]
    H264,
    /// H265
    #[serde(rename = "video/H265")]
    H265,
    /// AV1
    #[serde(rename = "video/AV1")]
    Av1,
    /// RTX
    #[serde(rename = "video/rtx")]
    Rtx,
}

impl fmt::Display for MimeTypeVideo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MimeTypeVideo::Vp8 => f.write_str("video/VP8"),
            MimeTypeVideo::Vp9 => f.write_str("video/VP9"),
            MimeTypeVideo::H264 => f.write_str("video/H264"),
            MimeTypeVideo::H265 => f.write_str("video/H265"),
            MimeTypeVideo::Av1 => f.write_str("video/AV1"),
            MimeTypeVideo::Rtx => f.write_str("video/rtx"),
        }
    }
}

/// One value of the codec parameter map, either textual or numeric.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RtpCodecParametersParametersValue {
    /// String value
    String(Cow<'static, str>),
    /// Numerical value
    Number(u32),
}

impl From<&'static str> for RtpCodecParametersParametersValue {
    fn from(s: &'static str) -> Self {
        Self::String(s.into())
    }
}

impl From<String> for RtpCodecParametersParametersValue {
    fn from(s: String) -> Self {
        Self::String(s.into())
    }
}

impl From<u32> for RtpCodecParametersParametersValue {
    fn from(n: u32) -> Self {
        Self::Number(n)
    }
}

/// Codec-specific parameter map (`useinbandfec` for Opus, `apt` on RTX codecs,
/// `packetization-mode`/`profile-level-id` for H264 and so on).
#[derive(Debug, Default, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct RtpCodecParametersParameters(
    BTreeMap<Cow<'static, str>, RtpCodecParametersParametersValue>,
);

impl RtpCodecParametersParameters {
    /// Insert another parameter into collection.
    pub fn insert<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<Cow<'static, str>>,
        V: Into<RtpCodecParametersParametersValue>,
    {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Get specific parameter from collection.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&RtpCodecParametersParametersValue> {
        self.0.get(key)
    }

    /// Iterate over parameters in collection.
    pub fn iter(
        &self,
    ) -> std::collections::btree_map::Iter<'_, Cow<'static, str>, RtpCodecParametersParametersValue>
    {
        self.0.iter()
    }

    pub(crate) fn get_number(&self, key: &str) -> Option<u32> {
        match self.get(key) {
            Some(RtpCodecParametersParametersValue::Number(number)) => Some(*number),
            _ => None,
        }
    }
}

impl<K, const N: usize> From<[(K, RtpCodecParametersParametersValue); N]>
    for RtpCodecParametersParameters
where
    K: Into<Cow<'static, str>>,
{
    fn from(array: [(K, RtpCodecParametersParametersValue); N]) -> Self {
        Self(
            IntoIterator::into_iter(array)
                .map(|(k, v)| (k.into(), v))
                .collect(),
        )
    }
}

/// RTCP feedback mechanism negotiated for a codec, carried on the wire as a
/// `{"type", "parameter"}` string pair.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum RtcpFeedback {
    /// NACK
    Nack,
    /// NACK PLI
    NackPli,
    /// CCM FIR
    CcmFir,
    /// goog-remb
    GoogRemb,
    /// transport-cc
    TransportCc,
    #[doc(hidden)]
    Unsupported,
}

impl Serialize for RtcpFeedback {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut rtcp_feedback = serializer.serialize_struct("RtcpFeedback", 2)?;
        let (r#type, parameter) = match self {
            RtcpFeedback::Nack => ("nack", ""),
            RtcpFeedback::NackPli => ("nack", "pli"),
            RtcpFeedback::CcmFir => ("ccm", "fir"),
            RtcpFeedback::GoogRemb => ("goog-remb", ""),
            RtcpFeedback::TransportCc => ("transport-cc", ""),
            RtcpFeedback::Unsupported => ("unknown", ""),
        };
        rtcp_feedback.serialize_field("type", r#type)?;
        rtcp_feedback.serialize_field("parameter", parameter)?;
        rtcp_feedback.end()
    }
}

impl<'de> Deserialize<'de> for RtcpFeedback {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // The wire shape is a {"type", "parameter"} pair; decode it as-is, then map the pair
        // onto the enum just like `Serialize` does in reverse.
        #[derive(Deserialize)]
        struct Pair {
            r#type: String,
            #[serde(default)]
            parameter: String,
        }

        let Pair { r#type, parameter } = Pair::deserialize(deserializer)?;

        Ok(match (r#type.as_str(), parameter.as_str()) {
            ("nack", "") => RtcpFeedback::Nack,
            ("nack", "pli") => RtcpFeedback::NackPli,
            ("ccm", "fir") => RtcpFeedback::CcmFir,
            ("goog-remb", "") => RtcpFeedback::GoogRemb,
            ("transport-cc", "") => RtcpFeedback::TransportCc,
            _ => RtcpFeedback::Unsupported,
        })
    }
}

/// A media or RTX codec entry within the RTP parameters.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RtpCodecParameters {
    /// Audio codec
    #[serde(rename_all = "camelCase")]
    Audio {
        /// MIME type, e.g. `audio/opus`.
        mime_type: MimeTypeAudio,
        /// Payload type carried in the RTP header. Unique per parameter set.
        payload_type: u8,
        /// Clock rate in Hertz.
        clock_rate: NonZeroU32,
        /// Channel count, e.g. two for stereo. Defaults to one.
        channels: NonZeroU8,
        /// Codec-specific parameter map.
        parameters: RtpCodecParametersParameters,
        /// RTCP feedback mechanisms negotiated for this codec.
        rtcp_feedback: Vec<RtcpFeedback>,
    },
    /// Video codec
    #[serde(rename_all = "camelCase")]
    Video {
        /// MIME type, e.g. `video/VP8`.
        mime_type: MimeTypeVideo,
        /// Payload type carried in the RTP header. Unique per parameter set.
        payload_type: u8,
        /// Clock rate in Hertz.
        clock_rate: NonZeroU32,
        /// Codec-specific parameter map.
        parameters: RtpCodecParametersParameters,
        /// RTCP feedback mechanisms negotiated for this codec.
        rtcp_feedback: Vec<RtcpFeedback>,
    },
}

impl RtpCodecParameters {
    /// Codec MIME type.
    #[must_use]
    pub fn mime_type(&self) -> MimeType {
        match self {
            Self::Audio { mime_type, .. } => MimeType::Audio(*mime_type),
            Self::Video { mime_type, .. } => MimeType::Video(*mime_type),
        }
    }

    /// RTP payload type.
    #[must_use]
    pub fn payload_type(&self) -> u8 {
        let (Self::Audio { payload_type, .. } | Self::Video { payload_type, .. }) = self;
        *payload_type
    }

    /// Codec clock rate in Hertz.
    #[must_use]
    pub fn clock_rate(&self) -> NonZeroU32 {
        let (Self::Audio { clock_rate, .. } | Self::Video { clock_rate, .. }) = self;
        *clock_rate
    }

    /// Codec-specific parameters.
    #[must_use]
    pub fn parameters(&self) -> &RtpCodecParametersParameters {
        let (Self::Audio { parameters, .. } | Self::Video { parameters, .. }) = self;
        parameters
    }

    /// RTCP feedback messages negotiated for this codec.
    #[must_use]
    pub fn rtcp_feedback(&self) -> &[RtcpFeedback] {
        let (Self::Audio { rtcp_feedback, .. } | Self::Video { rtcp_feedback, .. }) = self;
        rtcp_feedback
    }

    pub(crate) fn is_rtx(&self) -> bool {
        self.mime_type().is_rtx()
    }
}

/// The retransmission stream attached to an encoding.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
pub struct RtpEncodingParametersRtx {
    /// SSRC the retransmission stream uses.
    pub ssrc: u32,
}

/// One transmitted RTP stream: its SSRC, the codec it carries and the optional RTX stream
/// paired with it.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpEncodingParameters {
    /// SSRC of the media stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssrc: Option<u32>,
    /// RID header extension value identifying the stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    /// Payload type of the codec this encoding uses; the first media codec when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub codec_payload_type: Option<u8>,
    /// Paired retransmission stream, if negotiated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtx: Option<RtpEncodingParametersRtx>,
    /// Discontinuous transmission (the sender may go silent between talk spurts).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dtx: Option<bool>,
    /// Bitrate ceiling for this encoding, in bits per second.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_bitrate: Option<u32>,
}

/// RTCP settings of the stream the RTP parameters describe.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtcpParameters {
    /// Canonical name announced in SDES chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cname: Option<String>,
    /// Reduced-size RTCP (RFC 5506) when true, full RFC 3550 compound packets when false.
    /// Defaults to true.
    pub reduced_size: bool,
}

impl Default for RtcpParameters {
    fn default() -> Self {
        Self {
            cname: None,
            reduced_size: true,
        }
    }
}

/// The RTP parameters describe a media stream received by the worker from an endpoint (Producer
/// side) or sent by the worker to an endpoint (Consumer side). In the latter case there is a
/// single entry in the `encodings` array.
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpParameters {
    /// BUNDLE MID of the stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    /// Media and RTX codecs in use.
    pub codecs: Vec<RtpCodecParameters>,
    /// Transmitted RTP streams and their settings.
    pub encodings: Vec<RtpEncodingParameters>,
    /// Parameters used for RTCP.
    pub rtcp: RtcpParameters,
}

impl RtpParameters {
    /// The media codec that the given encoding maps onto, either via its explicit
    /// `codec_payload_type` or the first non-RTX codec.
    #[must_use]
    pub fn codec_for_encoding(&self, encoding: &RtpEncodingParameters) -> Option<&RtpCodecParameters> {
        match encoding.codec_payload_type {
            Some(payload_type) => self
                .codecs
                .iter()
                .find(|codec| !codec.is_rtx() && codec.payload_type() == payload_type),
            None => self.codecs.iter().find(|codec| !codec.is_rtx()),
        }
    }

    /// The RTX codec associated with the media codec of the given encoding, matched through the
    /// `apt` parameter.
    #[must_use]
    pub fn rtx_codec_for_encoding(
        &self,
        encoding: &RtpEncodingParameters,
    ) -> Option<&RtpCodecParameters> {
        let media_payload_type = self.codec_for_encoding(encoding)?.payload_type();

        self.codecs.iter().find(|codec| {
            codec.is_rtx()
                && codec.parameters().get_number("apt") == Some(u32::from(media_payload_type))
        })
    }
}
