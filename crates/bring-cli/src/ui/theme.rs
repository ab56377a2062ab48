//! Colors, column widths and size formatting shared by every view.

use crossterm::style::Color;

#[derive(Debug, Clone, Copy)]
pub struct Colors {
    pub package_name: Color,
    pub version: Color,
    pub secondary: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
}

#[derive(Debug, Clone, Copy)]
pub struct Layout {
    pub name_width: usize,
    pub version_width: usize,
    pub label_width: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Theme {
    pub colors: Colors,
    pub layout: Layout,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            colors: Colors {
                package_name: Color::White,
                version: Color::Cyan,
                secondary: Color::DarkGrey,
                success: Color::Green,
                warning: Color::Yellow,
                error: Color::Red,
            },
            layout: Layout {
                name_width: 24,
                version_width: 16,
                label_width: 12,
            },
        }
    }
}

/// Human readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
    }
}
