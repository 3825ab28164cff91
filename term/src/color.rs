//! Cell color attributes.

/// The color of a cell foreground or background.  SGR sequences select
/// entries from the 16 color palette; anything the application has not
/// colored explicitly keeps the `Default` sentinel, which the render
/// layer resolves to whatever the surrounding UI uses for its own
/// foreground/background.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorAttribute {
    Default,
    /// An index into the palette.  SGR 30-37/40-47 select 0..=7, the
    /// bright variants 90-97/100-107 select 8..=15.
    PaletteIndex(u8),
}

impl Default for ColorAttribute {
    fn default() -> ColorAttribute {
        ColorAttribute::Default
    }
}
