use crate::action::ActionType;
use crate::faction::FactionType;
use crate::region::RegionStatus;

pub type Rgb = (u8, u8, u8);

pub const NEUTRAL: Rgb = (0x75, 0x75, 0x75);
pub const NEUTRAL_BORDER: Rgb = (0x00, 0x00, 0x00);
pub const ADJACENCY_EDGE: Rgb = (0x66, 0x66, 0x66);

pub const fn action_color(action_type: ActionType) -> Rgb {
    match action_type {
        ActionType::War => (0xFF, 0x00, 0x00),
        ActionType::Capture => (0xFF, 0xA5, 0x00),
        ActionType::Wreckage => (0x8B, 0x45, 0x13),
        ActionType::Peace => (0x4C, 0xAF, 0x50),
        ActionType::Trade => (0x21, 0x96, 0xF3),
        ActionType::Diplomacy => (0x9C, 0x27, 0xB0),
        ActionType::Espionage => (0x60, 0x7D, 0x8B),
    }
}

pub const fn faction_color(faction_type: FactionType) -> Rgb {
    match faction_type {
        FactionType::Military => (0x2E, 0x7D, 0x32),
        FactionType::Civilian => (0x19, 0x76, 0xD2),
        FactionType::Terrorist => (0xD3, 0x2F, 0x2F),
    }
}

/// Status color, or `None` for a status the palette does not know.
pub const fn status_color(status: RegionStatus) -> Option<Rgb> {
    match status {
        RegionStatus::War => Some((0xD3, 0x2F, 0x2F)),
        RegionStatus::Wreckage => Some((0xFF, 0xA0, 0x00)),
        RegionStatus::Peace => Some((0x38, 0x8E, 0x3C)),
        RegionStatus::Unknown => None,
    }
}

/// Format as `#RRGGBB`.
pub fn hex_css((r, g, b): Rgb) -> String {
    format!("#{r:02X}{g:02X}{b:02X}")
}

/// Brighten a color by a factor (1.0 = no change, >1.0 = brighter).
pub fn brighten((r, g, b): Rgb, factor: f64) -> Rgb {
    (
        ((r as f64 * factor).min(255.0)) as u8,
        ((g as f64 * factor).min(255.0)) as u8,
        ((b as f64 * factor).min(255.0)) as u8,
    )
}
