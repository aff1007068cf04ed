use image::Rgb;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// 在数据目录中查找输入文件时的最大深度。
const DISCOVER_DEPTH: usize = 2;

pub fn color_valid_rgb_hex(s: &str) -> Result<Rgb<u8>, &'static str> {
    const ERR: &str = "十六进制RGB颜色格式错误";
    fn ck(s: &str) -> Option<Rgb<u8>> {
        let r = u8::from_str_radix(s.get(0..=1)?, 16).ok()?;
        let g = u8::from_str_radix(s.get(2..=3)?, 16).ok()?;
        let b = u8::from_str_radix(s.get(4..=5)?, 16).ok()?;
        Some(Rgb::from([r, g, b]))
    }
    match s.len() {
        6 => ck(s).ok_or(ERR),
        7 if s.as_bytes()[0] == b'#' => ck(&s[1..]).ok_or(ERR),
        _ => Err(ERR),
    }
}

/// 在`dir`下（最多两层）按文件名查找`name`。多个匹配时取路径字典序最小者。
pub fn discover(dir: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(dir)
        .max_depth(DISCOVER_DEPTH)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name().to_str() == Some(name))
        .map(|e| e.into_path())
        .min()
}

pub mod rgb {
    use image::Rgb;

    #[inline]
    pub fn black() -> Rgb<u8> {
        Rgb::from([0x00, 0x00, 0x00])
    }

    #[inline]
    pub fn white() -> Rgb<u8> {
        Rgb::from([0xFF, 0xFF, 0xFF])
    }

    #[inline]
    pub fn gray() -> Rgb<u8> {
        Rgb::from([0x80, 0x80, 0x80])
    }

    #[inline]
    pub fn red() -> Rgb<u8> {
        Rgb::from([0xD6, 0x27, 0x28])
    }

    #[inline]
    pub fn blue() -> Rgb<u8> {
        Rgb::from([0x1F, 0x77, 0xB4])
    }

    #[inline]
    pub fn orange() -> Rgb<u8> {
        Rgb::from([0xFF, 0x7F, 0x0E])
    }

    #[inline]
    pub fn green() -> Rgb<u8> {
        Rgb::from([0x2C, 0xA0, 0x2C])
    }

    /// `a`与`b`的线性插值，`t`取值于`[0, 1]`。
    pub fn lerp(a: Rgb<u8>, b: Rgb<u8>, t: f64) -> Rgb<u8> {
        let t = t.clamp(0.0, 1.0);
        let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * t).round() as u8;
        Rgb::from([mix(a[0], b[0]), mix(a[1], b[1]), mix(a[2], b[2])])
    }

    /// 蓝-白-红发散色标，`v`取值于`[-1, 1]`。
    pub fn diverging(v: f64) -> Rgb<u8> {
        if !v.is_finite() {
            return gray();
        }
        if v < 0.0 {
            lerp(white(), blue(), -v)
        } else {
            lerp(white(), red(), v)
        }
    }

    /// 按标签生成的区分度较高的颜色（黄金角色相）。
    pub fn label_color(label: u32) -> Rgb<u8> {
        let h = (label as f64 * 137.507_764) % 360.0;
        hsv(h, 0.65, 0.95)
    }

    fn hsv(h: f64, s: f64, v: f64) -> Rgb<u8> {
        let c = v * s;
        let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
        let m = v - c;
        let (r, g, b) = match (h / 60.0) as u32 {
            0 => (c, x, 0.0),
            1 => (x, c, 0.0),
            2 => (0.0, c, x),
            3 => (0.0, x, c),
            4 => (x, 0.0, c),
            _ => (c, 0.0, x),
        };
        let to = |u: f64| ((u + m) * 255.0).round() as u8;
        Rgb::from([to(r), to(g), to(b)])
    }
}
