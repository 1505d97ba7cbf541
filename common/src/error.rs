use thiserror::Error;

/// Malformed board or rule input. Always fatal for a routing session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InputError {
    #[error("pad {ref_des}.{pin} at ({x}, {y}) lies outside the board outline")]
    PadOutOfBounds {
        ref_des: String,
        pin: String,
        x: f64,
        y: f64,
    },

    #[error("zone {zone} of net '{net}' has a degenerate outline")]
    DegenerateZone { zone: usize, net: String },

    #[error("board outline has zero area")]
    DegenerateBoard,

    #[error("contradictory design rules: {0}")]
    InvalidRules(String),

    #[error("unknown net '{0}'")]
    UnknownNet(String),

    #[error("unknown layer '{0}'")]
    UnknownLayer(String),

    #[error("board has no copper layers")]
    EmptyLayerStack,

    #[error("board has {0} copper layers, at most {max} are supported", max = u8::MAX)]
    TooManyLayers(usize),

    #[error("layer index {layer} out of range for a {layers}-layer board")]
    LayerOutOfRange { layer: u8, layers: usize },

    #[error("invalid differential pair '{0}'")]
    InvalidPair(String),
}
