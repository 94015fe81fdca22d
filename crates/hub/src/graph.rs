//! Dashboard charts, rasterised straight to PNG.
//!
//! Two families: single-day charts over 00:00–23:59 (grow-light state and
//! temperature) and multi-day summary charts with one point per day.  Each
//! chart carries a title, labelled axis ticks and, for summaries, the value at
//! every point, set in an embedded DejaVu Sans Mono.

use ab_glyph::FontRef;
use base64::Engine;
use image::{ImageFormat, Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_filled_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use std::io::Cursor;
use time::{Date, PrimitiveDateTime, Time};

use crate::clock;

pub const WIDTH: u32 = 900;
pub const HEIGHT: u32 = 220;

const MARGIN_LEFT: f32 = 48.0;
const MARGIN_RIGHT: f32 = 20.0;
const MARGIN_TOP: f32 = 26.0;
const MARGIN_BOTTOM: f32 = 24.0;

const FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");
const TITLE_SCALE: f32 = 15.0;
const LABEL_SCALE: f32 = 12.0;

/// Minute index of 23:59; the x axis of every daily chart.
const DAY_END: f64 = 23.0 * 60.0 + 59.0;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
const AXIS: Rgba<u8> = Rgba([40, 40, 40, 255]);
const BLUE: Rgba<u8> = Rgba([31, 119, 180, 255]);
const ORANGE: Rgba<u8> = Rgba([255, 165, 0, 255]);
const RED: Rgba<u8> = Rgba([220, 30, 30, 255]);
const NIGHT: Rgba<u8> = Rgba([128, 128, 128, 255]);
const NIGHT_ALPHA: f32 = 0.3;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// `data:image/png;base64,...` for embedding in an `<img src>`.
pub fn png_data_uri(img: &RgbaImage) -> Result<String, image::ImageError> {
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;
    Ok(format!(
        "data:image/png;base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    ))
}

// ---------------------------------------------------------------------------
// Daily charts
// ---------------------------------------------------------------------------

/// What every daily chart needs besides its data.
#[derive(Debug, Clone, Copy)]
pub struct DayFrame {
    pub date: Date,
    pub now: PrimitiveDateTime,
    /// Sunrise and sunset, when the day's ephemeris is known.
    pub daylight: Option<(Time, Time)>,
}

impl DayFrame {
    fn now_minute(&self) -> Option<f64> {
        (self.now.date() == self.date).then(|| minute_of_day(self.now.time()))
    }

    fn shade_night(&self, plot: &mut Plot) {
        if let Some((rise, set)) = self.daylight {
            plot.shade(0.0, minute_of_day(rise), NIGHT, NIGHT_ALPHA);
            plot.shade(minute_of_day(set), DAY_END, NIGHT, NIGHT_ALPHA);
        }
    }
}

/// Grow-light state: orange where ON, red line at the current time.  The
/// title carries the day's lighting total.
pub fn daily_light_chart(
    frame: &DayFrame,
    on_intervals: &[(PrimitiveDateTime, PrimitiveDateTime)],
    minutes: i64,
) -> RgbaImage {
    let mut plot = Plot::new((0.0, DAY_END), (0.0, 1.0));

    for (start, end) in on_intervals {
        plot.fill_between(
            minute_of_day(start.time()),
            minute_of_day(end.time()),
            0.0,
            1.0,
            ORANGE,
        );
    }
    if let Some(now) = frame.now_minute() {
        plot.vline(now, RED);
    }
    frame.shade_night(&mut plot);
    plot.hour_ticks();
    plot.y_labels(&[(0.0, "OFF".into()), (1.0, "ON".into())]);
    plot.title(&format!(
        "{}  grow light {minutes} min",
        clock::format_date(frame.date)
    ));
    plot.finish()
}

/// Temperature trace with its daily mean as a dotted line.
pub fn daily_temperature_chart(
    frame: &DayFrame,
    samples: &[(PrimitiveDateTime, f64)],
    mean: Option<f64>,
) -> RgbaImage {
    let temps = samples.iter().map(|(_, t)| *t).chain(mean);
    let mut plot = Plot::new((0.0, DAY_END), padded_range(temps, 1.0));

    frame.shade_night(&mut plot);
    if let Some(now) = frame.now_minute() {
        plot.vline(now, RED);
    }
    if let Some(mean) = mean {
        plot.dotted(&[(0.0, mean), (DAY_END, mean)], BLUE);
    }
    let points: Vec<(f64, f64)> = samples
        .iter()
        .map(|(at, t)| (minute_of_day(at.time()), *t))
        .collect();
    plot.line(&points, BLUE, 2);
    plot.hour_ticks();
    plot.y_ticks(4, 1);
    let mean = match mean {
        Some(m) => format!("mean {m:.1}°C"),
        None => "no samples".to_string(),
    };
    plot.title(&format!("{}  temperature, {mean}", clock::format_date(frame.date)));
    plot.finish()
}

// ---------------------------------------------------------------------------
// Summary charts
// ---------------------------------------------------------------------------

/// Max and min dotted, mean solid with markers.  One x slot per entry of
/// `days`, which holds the tick labels.
pub fn summary_temperature_chart(
    days: &[String],
    max: &[Option<f64>],
    min: &[Option<f64>],
    mean: &[Option<f64>],
) -> RgbaImage {
    let all = max.iter().chain(min).chain(mean).flatten().copied();
    let mut plot = Plot::new(day_axis(days.len()), padded_range(all, 3.0));

    for (series, above) in [(max, true), (min, false)] {
        for run in runs(series) {
            plot.dotted(&run, BLUE);
            plot.values(&run, 1, above);
        }
    }
    for run in runs(mean) {
        plot.line(&run, BLUE, 2);
        plot.markers(&run, BLUE);
        plot.values(&run, 1, true);
    }
    plot.day_ticks(days);
    plot.y_ticks(4, 0);
    plot.title("temperature °C (max, mean, min)");
    plot.finish()
}

/// Lighting minutes per day, orange with markers.
pub fn summary_light_chart(days: &[String], minutes: &[Option<f64>]) -> RgbaImage {
    let top = minutes.iter().flatten().fold(0.0_f64, |a, &b| a.max(b));
    let mut plot = Plot::new(day_axis(days.len()), (0.0, (top * 1.2).max(10.0)));

    for run in runs(minutes) {
        plot.line(&run, ORANGE, 2);
        plot.markers(&run, ORANGE);
        plot.values(&run, 0, true);
    }
    plot.day_ticks(days);
    plot.y_ticks(4, 0);
    plot.title("grow light minutes per day");
    plot.finish()
}

/// `MM/DD` tick label for a `YYYY/MM/DD` key.
pub fn day_label(date_key: &str) -> String {
    date_key.get(5..).unwrap_or(date_key).to_string()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn minute_of_day(t: Time) -> f64 {
    f64::from(t.hour()) * 60.0 + f64::from(t.minute())
}

fn day_axis(days: usize) -> (f64, f64) {
    (-0.5, days.max(1) as f64 - 0.5)
}

/// Data range widened by `pad`; a flat or empty series still gets a span.
fn padded_range(values: impl Iterator<Item = f64>, pad: f64) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if lo.is_finite() && hi.is_finite() {
        (lo - pad, hi + pad)
    } else {
        (0.0, 40.0)
    }
}

/// Split a series at its gaps into runs of `(index, value)` points.
fn runs(series: &[Option<f64>]) -> Vec<Vec<(f64, f64)>> {
    let mut out = Vec::new();
    let mut current = Vec::new();
    for (i, v) in series.iter().enumerate() {
        match v {
            Some(v) => current.push((i as f64, *v)),
            None if !current.is_empty() => out.push(std::mem::take(&mut current)),
            None => {}
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[derive(Debug, Clone, Copy)]
enum Align {
    Left,
    Centre,
    Right,
}

/// A chart area with data-space to pixel-space mapping.
struct Plot {
    img: RgbaImage,
    x: (f64, f64),
    y: (f64, f64),
    /// `None` only if the embedded font fails to parse; text is then skipped.
    font: Option<FontRef<'static>>,
}

impl Plot {
    fn new(x: (f64, f64), y: (f64, f64)) -> Self {
        let font = FontRef::try_from_slice(FONT)
            .inspect_err(|e| tracing::warn!(error = %e, "chart font unusable"))
            .ok();
        let mut plot = Self {
            img: RgbaImage::from_pixel(WIDTH, HEIGHT, WHITE),
            x,
            y,
            font,
        };
        let (left, bottom) = (MARGIN_LEFT, HEIGHT as f32 - MARGIN_BOTTOM);
        draw_line_segment_mut(&mut plot.img, (left, MARGIN_TOP), (left, bottom), AXIS);
        draw_line_segment_mut(
            &mut plot.img,
            (left, bottom),
            (WIDTH as f32 - MARGIN_RIGHT, bottom),
            AXIS,
        );
        plot
    }

    fn px(&self, x: f64) -> f32 {
        let span = (self.x.1 - self.x.0).max(f64::EPSILON);
        let w = WIDTH as f32 - MARGIN_LEFT - MARGIN_RIGHT;
        MARGIN_LEFT + ((x - self.x.0) / span) as f32 * w
    }

    fn py(&self, y: f64) -> f32 {
        let span = (self.y.1 - self.y.0).max(f64::EPSILON);
        let h = HEIGHT as f32 - MARGIN_TOP - MARGIN_BOTTOM;
        HEIGHT as f32 - MARGIN_BOTTOM - ((y - self.y.0) / span) as f32 * h
    }

    fn line(&mut self, pts: &[(f64, f64)], colour: Rgba<u8>, width: u32) {
        for pair in pts.windows(2) {
            let (a, b) = (self.at(pair[0]), self.at(pair[1]));
            for dy in 0..width {
                let off = dy as f32 - (width as f32 - 1.0) / 2.0;
                draw_line_segment_mut(&mut self.img, (a.0, a.1 + off), (b.0, b.1 + off), colour);
            }
        }
    }

    /// 2px on, 3px off.
    fn dotted(&mut self, pts: &[(f64, f64)], colour: Rgba<u8>) {
        for pair in pts.windows(2) {
            let (a, b) = (self.at(pair[0]), self.at(pair[1]));
            let len = ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt();
            let mut s = 0.0;
            while s < len {
                let e = (s + 2.0).min(len);
                let lerp = |t: f32| (a.0 + (b.0 - a.0) * t / len, a.1 + (b.1 - a.1) * t / len);
                draw_line_segment_mut(&mut self.img, lerp(s), lerp(e), colour);
                s += 5.0;
            }
        }
    }

    fn markers(&mut self, pts: &[(f64, f64)], colour: Rgba<u8>) {
        for &p in pts {
            let (x, y) = self.at(p);
            draw_filled_circle_mut(&mut self.img, (x.round() as i32, y.round() as i32), 3, colour);
        }
    }

    fn vline(&mut self, x: f64, colour: Rgba<u8>) {
        let px = self.px(x);
        draw_line_segment_mut(
            &mut self.img,
            (px, MARGIN_TOP),
            (px, HEIGHT as f32 - MARGIN_BOTTOM - 1.0),
            colour,
        );
    }

    fn fill_between(&mut self, x0: f64, x1: f64, y0: f64, y1: f64, colour: Rgba<u8>) {
        let (left, right) = (self.px(x0).round() as i32, self.px(x1).round() as i32);
        let (top, bottom) = (self.py(y1).round() as i32, self.py(y0).round() as i32);
        let w = (right - left).max(1) as u32;
        let h = (bottom - top).max(1) as u32;
        draw_filled_rect_mut(&mut self.img, Rect::at(left, top).of_size(w, h), colour);
    }

    /// Alpha-blend a vertical band over whatever is already drawn.
    fn shade(&mut self, x0: f64, x1: f64, colour: Rgba<u8>, alpha: f32) {
        let left = self.px(x0).round().max(MARGIN_LEFT + 1.0) as u32;
        let right = self.px(x1).round().min(WIDTH as f32 - MARGIN_RIGHT) as u32;
        let top = MARGIN_TOP as u32;
        let bottom = (HEIGHT as f32 - MARGIN_BOTTOM) as u32;
        for x in left..right {
            for y in top..bottom {
                let p = self.img.get_pixel_mut(x, y);
                for c in 0..3 {
                    p[c] = (f32::from(p[c]) * (1.0 - alpha) + f32::from(colour[c]) * alpha) as u8;
                }
            }
        }
    }

    // -- Text ---------------------------------------------------------------

    /// Draw `text` with its top edge at `top`, anchored at `x` by `align`.
    fn text(&mut self, text: &str, x: f32, top: f32, align: Align, scale: f32) {
        let Some(font) = &self.font else {
            return;
        };
        let (w, _) = text_size(scale, font, text);
        let left = match align {
            Align::Left => x,
            Align::Centre => x - w as f32 / 2.0,
            Align::Right => x - w as f32,
        };
        draw_text_mut(
            &mut self.img,
            AXIS,
            left.round() as i32,
            top.round() as i32,
            scale,
            font,
            text,
        );
    }

    fn title(&mut self, text: &str) {
        self.text(text, MARGIN_LEFT, 5.0, Align::Left, TITLE_SCALE);
    }

    fn hour_ticks(&mut self) {
        for hour in (0..=24).step_by(3) {
            let x = f64::from(hour * 60).min(DAY_END);
            self.tick(x);
            self.x_label(x, &format!("{hour:02}:00"));
        }
    }

    fn day_ticks(&mut self, days: &[String]) {
        for (i, day) in days.iter().enumerate() {
            self.tick(i as f64);
            self.x_label(i as f64, day);
        }
    }

    fn tick(&mut self, x: f64) {
        let px = self.px(x);
        let y = HEIGHT as f32 - MARGIN_BOTTOM;
        draw_line_segment_mut(&mut self.img, (px, y), (px, y + 5.0), AXIS);
    }

    fn x_label(&mut self, x: f64, text: &str) {
        let top = HEIGHT as f32 - MARGIN_BOTTOM + 7.0;
        self.text(text, self.px(x), top, Align::Centre, LABEL_SCALE);
    }

    /// `steps + 1` evenly spaced labels up the y axis.
    fn y_ticks(&mut self, steps: u32, decimals: usize) {
        let (lo, hi) = self.y;
        let labels: Vec<(f64, String)> = (0..=steps)
            .map(|i| {
                let v = lo + (hi - lo) * f64::from(i) / f64::from(steps);
                (v, format!("{v:.decimals$}"))
            })
            .collect();
        self.y_labels(&labels);
    }

    fn y_labels(&mut self, labels: &[(f64, String)]) {
        for (v, text) in labels {
            let y = self.py(*v);
            draw_line_segment_mut(&mut self.img, (MARGIN_LEFT - 4.0, y), (MARGIN_LEFT, y), AXIS);
            self.text(text, MARGIN_LEFT - 6.0, y - LABEL_SCALE / 2.0, Align::Right, LABEL_SCALE);
        }
    }

    /// Print each point's value just above (or below) it.
    fn values(&mut self, pts: &[(f64, f64)], decimals: usize, above: bool) {
        for &(x, v) in pts {
            let (px, py) = self.at((x, v));
            let top = if above { py - LABEL_SCALE - 5.0 } else { py + 5.0 };
            self.text(&format!("{v:.decimals$}"), px, top, Align::Centre, LABEL_SCALE);
        }
    }

    fn at(&self, (x, y): (f64, f64)) -> (f32, f32) {
        (self.px(x), self.py(y))
    }

    fn finish(self) -> RgbaImage {
        self.img
    }
}
