//! CLI enum types.

use clap::ValueEnum;

use clipchain::AspectRatio;

/// Output aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum Aspect {
    #[default]
    #[value(name = "16:9", alias = "landscape")]
    Landscape,
    #[value(name = "9:16", alias = "portrait")]
    Portrait,
    #[value(name = "1:1", alias = "square")]
    Square,
}

impl From<Aspect> for AspectRatio {
    fn from(a: Aspect) -> Self {
        match a {
            Aspect::Landscape => AspectRatio::Landscape16x9,
            Aspect::Portrait => AspectRatio::Portrait9x16,
            Aspect::Square => AspectRatio::Square1x1,
        }
    }
}
