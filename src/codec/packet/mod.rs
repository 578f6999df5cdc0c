// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Built-in packet framing strategies: length-prefixed, fixed-length and
//! delimiter-framed.

pub mod delimiter;
pub mod fixed_length;
pub mod length_prefixed;

pub use delimiter::DelimiterCodec;
pub use fixed_length::FixedLengthCodec;
pub use length_prefixed::LengthPrefixedCodec;
