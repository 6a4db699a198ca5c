//! Keys identifying source images and decoded renditions.

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};

/// Logical key of a source image, usually its URI.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(String);

impl ResourceId {
    /// Creates a new `ResourceId` from any string-like input.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ResourceId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Pixel layout a rendition is decoded into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 32 bits per pixel with alpha.
    #[default]
    Argb8888,
    /// 16 bits per pixel, no alpha.
    Rgb565,
    /// Alpha channel only.
    Alpha8,
}

impl PixelFormat {
    /// Bytes used by a single pixel in this format.
    #[must_use]
    pub const fn bytes_per_pixel(self) -> u64 {
        match self {
            Self::Argb8888 => 4,
            Self::Rgb565 => 2,
            Self::Alpha8 => 1,
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Argb8888 => write!(f, "argb8888"),
            Self::Rgb565 => write!(f, "rgb565"),
            Self::Alpha8 => write!(f, "alpha8"),
        }
    }
}

/// Identifies one decoded rendition of a resource.
///
/// Used both as the memory cache key and as the decode coalescing key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DecodeSignature {
    resource: ResourceId,
    sample_size: NonZeroU32,
    pixel_format: PixelFormat,
}

impl DecodeSignature {
    /// Creates a new signature.
    #[must_use]
    pub const fn new(
        resource: ResourceId,
        sample_size: NonZeroU32,
        pixel_format: PixelFormat,
    ) -> Self {
        Self {
            resource,
            sample_size,
            pixel_format,
        }
    }

    /// Returns the resource this rendition was decoded from.
    #[must_use]
    pub const fn resource(&self) -> &ResourceId {
        &self.resource
    }

    /// Returns the downscaling factor.
    #[must_use]
    pub const fn sample_size(&self) -> NonZeroU32 {
        self.sample_size
    }

    /// Returns the pixel layout.
    #[must_use]
    pub const fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }
}

impl std::fmt::Display for DecodeSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}x/{}",
            self.resource, self.sample_size, self.pixel_format
        )
    }
}

/// Requested bounds of the view an image is loaded into.
///
/// A missing dimension means that axis does not constrain the decode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ScalingDescriptor {
    width: Option<NonZeroU32>,
    height: Option<NonZeroU32>,
}

impl ScalingDescriptor {
    /// Creates a descriptor from optional bounds.
    #[must_use]
    pub const fn new(width: Option<NonZeroU32>, height: Option<NonZeroU32>) -> Self {
        Self { width, height }
    }

    /// Creates a descriptor bounded on both axes.
    ///
    /// Zero is treated as "no bound" on that axis.
    #[must_use]
    pub const fn bounded(width: u32, height: u32) -> Self {
        Self {
            width: NonZeroU32::new(width),
            height: NonZeroU32::new(height),
        }
    }

    /// Creates a descriptor with no bounds.
    #[must_use]
    pub const fn unbounded() -> Self {
        Self {
            width: None,
            height: None,
        }
    }

    /// Returns the requested width.
    #[must_use]
    pub const fn width(&self) -> Option<NonZeroU32> {
        self.width
    }

    /// Returns the requested height.
    #[must_use]
    pub const fn height(&self) -> Option<NonZeroU32> {
        self.height
    }

    /// Returns true if neither axis is bounded.
    #[must_use]
    pub const fn is_unbounded(&self) -> bool {
        self.width.is_none() && self.height.is_none()
    }

    /// Computes the power-of-two sample size for an image with the given
    /// intrinsic dimensions.
    ///
    /// The result is the largest power of two that keeps the decoded image at
    /// least as large as every bounded axis.
    #[must_use]
    pub fn sample_size_for(&self, intrinsic_width: u32, intrinsic_height: u32) -> NonZeroU32 {
        let mut sample = 1u32;
        loop {
            let next = sample.saturating_mul(2);
            let fits_width = self
                .width
                .is_none_or(|w| intrinsic_width / next >= w.get());
            let fits_height = self
                .height
                .is_none_or(|h| intrinsic_height / next >= h.get());
            if self.is_unbounded() || next == sample || !(fits_width && fits_height) {
                break;
            }
            sample = next;
        }
        NonZeroU32::new(sample).unwrap_or(NonZeroU32::MIN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use test_case::test_case;

    fn nz(v: u32) -> NonZeroU32 {
        NonZeroU32::new(v).unwrap()
    }

    #[test]
    fn test_signature_structural_equality() {
        let a = DecodeSignature::new("url1".into(), nz(1), PixelFormat::Argb8888);
        let b = DecodeSignature::new("url1".into(), nz(1), PixelFormat::Argb8888);
        let c = DecodeSignature::new("url1".into(), nz(2), PixelFormat::Argb8888);
        let d = DecodeSignature::new("url1".into(), nz(1), PixelFormat::Rgb565);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);

        let set: HashSet<_> = [a, b, c, d].into_iter().collect();
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_bounded_zero_means_unbounded_axis() {
        let scaling = ScalingDescriptor::bounded(0, 0);
        assert!(scaling.is_unbounded());
        assert_eq!(scaling, ScalingDescriptor::unbounded());
    }

    #[test_case(ScalingDescriptor::unbounded(), 1024, 768, 1 ; "unbounded")]
    #[test_case(ScalingDescriptor::bounded(1024, 768), 1024, 768, 1 ; "exact_fit")]
    #[test_case(ScalingDescriptor::bounded(512, 384), 1024, 768, 2 ; "half")]
    #[test_case(ScalingDescriptor::bounded(100, 100), 1024, 768, 4 ; "height_limits")]
    #[test_case(ScalingDescriptor::bounded(100, 0), 1024, 768, 8 ; "width_only")]
    #[test_case(ScalingDescriptor::bounded(2000, 2000), 1024, 768, 1 ; "larger_than_image")]
    fn test_sample_size(scaling: ScalingDescriptor, w: u32, h: u32, expected: u32) {
        assert_eq!(scaling.sample_size_for(w, h).get(), expected);
    }
}
