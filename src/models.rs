use std::fmt;

use serde::{Deserialize, Serialize};

use crate::response::ImageStream;

/// A transformation step understood by the API.
///
/// The parameters of each step are forwarded verbatim; see the Optidash
/// documentation for the accepted keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Optimize,
    Flip,
    Resize,
    Scale,
    Crop,
    Watermark,
    Mask,
    Stylize,
    Adjust,
    Auto,
    Border,
    Padding,
    Store,
    Output,
    Webhook,
    Response,
    Cdn,
}

impl Step {
    /// Every step, in declaration order.
    pub const ALL: [Step; 17] = [
        Step::Optimize,
        Step::Flip,
        Step::Resize,
        Step::Scale,
        Step::Crop,
        Step::Watermark,
        Step::Mask,
        Step::Stylize,
        Step::Adjust,
        Step::Auto,
        Step::Border,
        Step::Padding,
        Step::Store,
        Step::Output,
        Step::Webhook,
        Step::Response,
        Step::Cdn,
    ];

    /// Key used for this step in the request payload.
    pub fn as_str(self) -> &'static str {
        match self {
            Step::Optimize => "optimize",
            Step::Flip => "flip",
            Step::Resize => "resize",
            Step::Scale => "scale",
            Step::Crop => "crop",
            Step::Watermark => "watermark",
            Step::Mask => "mask",
            Step::Stylize => "stylize",
            Step::Adjust => "adjust",
            Step::Auto => "auto",
            Step::Border => "border",
            Step::Padding => "padding",
            Step::Store => "store",
            Step::Output => "output",
            Step::Webhook => "webhook",
            Step::Response => "response",
            Step::Cdn => "cdn",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parameters of a single step. Any JSON tree is accepted; `null` means unset.
pub type Params = serde_json::Value;

/// Returned by [`Request::to_stream`](crate::Request::to_stream).
#[derive(Debug)]
pub struct ImageResponse {
    /// Decoded `X-Optidash-Meta` header, if the server sent one.
    pub meta: Option<serde_json::Value>,
    /// The resulting image. Dropping it releases the connection.
    pub stream: ImageStream,
}
