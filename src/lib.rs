pub mod cancel;
pub mod codec;
pub mod error;
pub mod gif;
pub mod image;
pub mod jpeg;
pub mod meta;
pub mod options;
pub mod png;
pub mod registry;
pub mod stream;

pub use cancel::CancelToken;
pub use codec::{register_codec, Codec, CodecId};
pub use error::{Error, MetadataKind, Result};
pub use image::{ColorModel, ImageConfig, PixelLayout, Pixmap};
pub use meta::subcodec::{
    register_packet_codec, register_profile_codec, register_tag_table_codec, ColorProfile, Packet,
    TagTable,
};
pub use meta::{Deferred, ExtensionStore, TextEntry, TextKind};
pub use options::{
    DamageOptions, DecodeDepth, DecodeDepthOptions, LimitOptions, ReadOption, TransformMode,
    TransformOptions, WriteOption,
};
pub use registry::{
    decode_config, decode_image, decode_metadata, decode_with_options, encode,
    encode_with_options, register, Body, Decoded, Metadata,
};
