use colored::Color;

pub const PRIMARY: Color = Color::BrightCyan;
pub const ACCENT: Color = Color::BrightYellow;
pub const SEPARATOR: Color = Color::BrightBlack;
pub const TEXT_DEFAULT: Color = Color::White;

pub const PORT_OPEN: Color = Color::BrightGreen;
pub const PORT_CLOSED: Color = Color::Red;
pub const PORT_ERROR: Color = Color::Magenta;

pub const AUTH_OK: Color = Color::BrightGreen;
pub const AUTH_FAILED: Color = Color::BrightRed;
