use std::io::Cursor;
use std::path::Path;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::*;

use crate::drivers::error::PlotError;
use crate::drivers::pipeline::ScopeView;

#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    /// Height of each channel strip.
    pub strip_height: u32,
    pub background: RGBColor,
    pub palette: Vec<RGBColor>,
    pub marker: RGBColor,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 1200,
            strip_height: 220,
            background: RGBColor(10, 10, 10),
            palette: vec![BLUE, RED, GREEN, CYAN, MAGENTA, YELLOW],
            marker: WHITE,
        }
    }
}

/// One strip per channel: the trace, its trigger threshold and circles on each crossing.
pub fn render_view_png(view: &ScopeView, style: &PlotStyle) -> Result<Vec<u8>, PlotError> {
    let strips = view.channels.len();
    let len = view.channels.first().map_or(0, |c| c.values.len());
    if strips == 0 || len < 2 {
        return Err(PlotError::Empty("scope view has no samples"));
    }
    let height = style.strip_height * strips as u32;
    let mut buffer = vec![0u8; (style.width * height * 3) as usize];
    {
        let root =
            BitMapBackend::with_buffer(&mut buffer, (style.width, height)).into_drawing_area();
        root.fill(&style.background)?;
        let areas = root.split_evenly((strips, 1));
        for (idx, (area, channel)) in areas.iter().zip(&view.channels).enumerate() {
            let color = style.palette[idx % style.palette.len()];
            let (lo, hi) = y_bounds(&channel.values);
            let x_max = channel.values.len().saturating_sub(1) as f64;
            let mut chart = ChartBuilder::on(area)
                .margin(8)
                .build_cartesian_2d(0f64..x_max, lo..hi)?;

            if let Some(thr) = channel.threshold {
                chart.draw_series(LineSeries::new(
                    [(0.0, thr), (x_max, thr)],
                    &style.marker.mix(0.25),
                ))?;
            }
            chart.draw_series(LineSeries::new(
                channel
                    .values
                    .iter()
                    .enumerate()
                    .map(|(i, v)| (i as f64, *v)),
                &color,
            ))?;
            chart.draw_series(channel.crossings.iter().map(|&i| {
                Circle::new(
                    (i as f64, channel.values[i]),
                    3,
                    style.marker.stroke_width(1),
                )
            }))?;
        }
        if let Some(at) = view.trigger_at {
            let x = (at as f64 / (len - 1) as f64 * style.width as f64) as i32;
            root.draw(&PathElement::new(
                vec![(x, 0), (x, height as i32)],
                &style.marker.mix(0.4),
            ))?;
        }
        root.present()?;
    }
    encode_png(&buffer, style.width, height)
}

pub fn save_view_png(view: &ScopeView, style: &PlotStyle, path: &Path) -> anyhow::Result<()> {
    let png = render_view_png(view, style)?;
    std::fs::write(path, png)?;
    log::info!("plot saved to {}", path.display());
    Ok(())
}

fn y_bounds(values: &[f64]) -> (f64, f64) {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !lo.is_finite() || !hi.is_finite() {
        return (-1.0, 1.0);
    }
    let span = hi - lo;
    if span < f64::EPSILON {
        (lo - 1.0, hi + 1.0)
    } else {
        (lo - 0.05 * span, hi + 0.05 * span)
    }
}

fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, PlotError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or(PlotError::Render("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    DynamicImage::ImageRgb8(image).write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
