//! 用`image`逐像素绘制的结果图：相关热图、质控曲线、网络图与图谱叠加图。

use super::utils::rgb;
use connectome::network::NetworkGraph;
use connectome::prep::Volume;
use image::{Rgb, RgbImage};
use ndarray::Array2;
use std::f64::consts::PI;

/// 曲线图中的一条曲线。
pub struct Trace<'a> {
    pub values: &'a [f64],
    pub color: Rgb<u8>,
    /// 以虚线画出的阈值。
    pub threshold: Option<f64>,
}

/// 相关矩阵热图。`significant`给出时，不显著的格子画上灰色叉。
pub fn heatmap(r: &Array2<f64>, significant: Option<&Array2<bool>>, size: u32) -> RgbImage {
    let k = r.nrows().max(1) as u32;
    let cell = (size / k).max(1);
    let mut img = RgbImage::from_pixel(cell * k, cell * k, rgb::white());
    for ((i, j), &v) in r.indexed_iter() {
        let (x0, y0) = (j as u32 * cell, i as u32 * cell);
        fill_rect(&mut img, x0, y0, cell, cell, rgb::diverging(v));
        let crossed = significant.map_or(false, |s| !s[[i, j]]);
        if crossed && cell >= 4 {
            let (x1, y1) = ((x0 + cell - 1) as i64, (y0 + cell - 1) as i64);
            draw_line(&mut img, (x0 as i64, y0 as i64), (x1, y1), rgb::gray());
            draw_line(&mut img, (x0 as i64, y1), (x1, y0 as i64), rgb::gray());
        }
    }
    img
}

/// 上下排列的若干曲线面板，每条曲线按自身最小、最大值缩放。
pub fn traces(panels: &[Trace], width: u32, height: u32) -> RgbImage {
    let mut img = RgbImage::from_pixel(width, height, rgb::white());
    if panels.is_empty() {
        return img;
    }
    let panel_h = height / panels.len() as u32;
    let margin = 4_u32;
    for (p, trace) in panels.iter().enumerate() {
        let top = p as u32 * panel_h;
        if p > 0 {
            draw_line(&mut img, (0, top as i64), (width as i64 - 1, top as i64), rgb::black());
        }
        let n = trace.values.len();
        if n == 0 || panel_h <= 2 * margin {
            continue;
        }
        let finite = trace.values.iter().copied().filter(|v| v.is_finite());
        let (lo, hi) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(a, b), v| {
            (a.min(v), b.max(v))
        });
        let (lo, hi) = match trace.threshold {
            Some(t) => (lo.min(t), hi.max(t)),
            None => (lo, hi),
        };
        let span = if hi > lo { hi - lo } else { 1.0 };
        let inner = (panel_h - 2 * margin) as f64;
        let to_y = |v: f64| (top + margin) as i64 + (inner * (1.0 - (v - lo) / span)).round() as i64;
        let to_x = |t: usize| {
            if n == 1 {
                0
            } else {
                (t as f64 * (width - 1) as f64 / (n - 1) as f64).round() as i64
            }
        };
        if let Some(t) = trace.threshold {
            let y = to_y(t);
            for x in (0..width as i64).step_by(6) {
                draw_line(&mut img, (x, y), (x + 2, y), rgb::gray());
            }
        }
        for t in 1..n {
            let (a, b) = (trace.values[t - 1], trace.values[t]);
            if a.is_finite() && b.is_finite() {
                draw_line(&mut img, (to_x(t - 1), to_y(a)), (to_x(t), to_y(b)), trace.color);
            }
        }
    }
    img
}

/// 环形布局的网络图：边的颜色深浅表示权重，节点大小表示度。
pub fn graph(g: &NetworkGraph, size: u32, edge_color: Rgb<u8>) -> RgbImage {
    let mut img = RgbImage::from_pixel(size, size, rgb::white());
    let n = g.n_nodes();
    if n == 0 {
        return img;
    }
    let c = size as f64 / 2.0;
    let radius = size as f64 * 0.4;
    let pos: Vec<(i64, i64)> = (0..n)
        .map(|i| {
            let a = 2.0 * PI * i as f64 / n as f64 - PI / 2.0;
            ((c + radius * a.cos()).round() as i64, (c + radius * a.sin()).round() as i64)
        })
        .collect();
    let max_w = g
        .edges()
        .iter()
        .map(|e| e.weight)
        .fold(0.0_f64, f64::max)
        .max(f64::EPSILON);
    for e in g.edges() {
        let color = rgb::lerp(rgb::white(), edge_color, 0.25 + 0.75 * e.weight / max_w);
        draw_line(&mut img, pos[e.source], pos[e.target], color);
    }
    let degree = &g.stats().degree;
    for (i, &(x, y)) in pos.iter().enumerate() {
        let r = 4 + degree[i].min(12) as i64;
        fill_circle(&mut img, (x, y), r + 1, rgb::black());
        fill_circle(&mut img, (x, y), r, rgb::label_color(g.labels()[i]));
    }
    img
}

/// 图谱在平均BOLD图像上的叠加图（轴位中间层，前方朝上）。
pub fn overlay(background: &Volume, atlas: &Volume, size: u32) -> RgbImage {
    let [nx, ny, nz] = background.spatial_shape();
    let z = nz / 2;
    let scale = (size / nx.max(ny).max(1) as u32).max(1);
    let mut img = RgbImage::new(nx as u32 * scale, ny as u32 * scale);
    let bg = background.frame(0);
    let (lo, hi) = bg
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(a, b), v| (a.min(v), b.max(v)));
    let span = if hi > lo { (hi - lo) as f64 } else { 1.0 };
    for y in 0..ny {
        for x in 0..nx {
            let g = ((bg[[x, y, z]] - lo) as f64 / span * 255.0).clamp(0.0, 255.0) as u8;
            let mut color = Rgb::from([g, g, g]);
            let label = atlas.get((x, y, z).into()).unwrap_or(0.0).round();
            if label >= 1.0 {
                color = rgb::lerp(color, rgb::label_color(label as u32), 0.5);
            }
            let row = (ny - 1 - y) as u32 * scale;
            fill_rect(&mut img, x as u32 * scale, row, scale, scale, color);
        }
    }
    img
}

fn fill_rect(img: &mut RgbImage, x0: u32, y0: u32, w: u32, h: u32, color: Rgb<u8>) {
    for y in y0..(y0 + h).min(img.height()) {
        for x in x0..(x0 + w).min(img.width()) {
            img.put_pixel(x, y, color);
        }
    }
}

fn put(img: &mut RgbImage, x: i64, y: i64, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && x < img.width() as i64 && y < img.height() as i64 {
        img.put_pixel(x as u32, y as u32, color);
    }
}

/// Bresenham直线，超出画布的部分被裁掉。
fn draw_line(img: &mut RgbImage, from: (i64, i64), to: (i64, i64), color: Rgb<u8>) {
    let (mut x, mut y) = from;
    let dx = (to.0 - x).abs();
    let dy = -(to.1 - y).abs();
    let sx = if x < to.0 { 1 } else { -1 };
    let sy = if y < to.1 { 1 } else { -1 };
    let mut err = dx + dy;
    loop {
        put(img, x, y, color);
        if x == to.0 && y == to.1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
}

fn fill_circle(img: &mut RgbImage, center: (i64, i64), r: i64, color: Rgb<u8>) {
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                put(img, center.0 + dx, center.1 + dy, color);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_heatmap() {
        let r = Array2::from_shape_vec((2, 2), vec![1.0, -1.0, -1.0, 1.0]).unwrap();
        let sig = Array2::from_shape_vec((2, 2), vec![true, false, false, true]).unwrap();
        let img = heatmap(&r, Some(&sig), 100);
        assert_eq!(img.dimensions(), (100, 100));
        assert_eq!(*img.get_pixel(25, 10), rgb::red());
        // 不显著格子的对角线
        assert_eq!(*img.get_pixel(50, 0), rgb::gray());
        assert_eq!(*img.get_pixel(80, 10), rgb::blue());
    }

    #[test]
    fn test_line_endpoints() {
        let mut img = RgbImage::from_pixel(10, 10, rgb::white());
        draw_line(&mut img, (1, 1), (8, 5), rgb::black());
        assert_eq!(*img.get_pixel(1, 1), rgb::black());
        assert_eq!(*img.get_pixel(8, 5), rgb::black());
        // 画布外的部分被裁掉
        draw_line(&mut img, (-5, 0), (20, 0), rgb::black());
        assert_eq!(*img.get_pixel(9, 0), rgb::black());
    }

    #[test]
    fn test_traces() {
        let fd = [0.0, 0.2, 0.9, 0.1];
        let panels = [Trace {
            values: &fd,
            color: rgb::red(),
            threshold: Some(0.5),
        }];
        let img = traces(&panels, 120, 60);
        assert_eq!(img.dimensions(), (120, 60));
        assert!(img.pixels().any(|p| *p == rgb::red()));
    }

    #[test]
    fn test_overlay() {
        let bg = Volume::from_array3(Array3::from_elem((4, 3, 3), 10.0), [1.0; 3]);
        let mut labels = Array3::zeros((4, 3, 3));
        labels[[0, 0, 1]] = 5.0;
        let atlas = Volume::from_array3(labels, [1.0; 3]);
        let img = overlay(&bg, &atlas, 40);
        assert_eq!(img.dimensions(), (40, 30));
        // (0, 0)在最下一行
        assert_ne!(*img.get_pixel(0, 29), *img.get_pixel(39, 0));
    }
}
