//! Moon-phase icon.
//!
//! A lit disc with a shadow polygon swept over it.  The terminator is
//! sampled every 5° from the north pole to the south pole at horizontal
//! offset `R * sin(lat) * cos(2π * age / 28)`; the 29.53-day cycle is
//! squashed to 28 days on purpose.  Everything outside the disc is cleared
//! back to transparent.

use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_polygon_mut};
use imageproc::point::Point;
use std::f64::consts::PI;

use crate::graph::png_data_uri;

pub const SIZE: u32 = 100;
const RADIUS: i32 = 46;

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);
const LIT: Rgba<u8> = Rgba([255, 255, 100, 255]);
const SHADOW: Rgba<u8> = Rgba([60, 60, 60, 255]);

/// Ages treated as new moon (fully shadowed).
const NEW_BELOW: f64 = 0.3;
const NEW_ABOVE: f64 = 27.7;
/// Ages treated as full moon (fully lit).  Deliberately wider than the
/// earlier 13.4–14.3 band so that a 14.77-day moon still draws full.
const FULL_WINDOW: (f64, f64) = (13.4, 15.2);

pub fn render(age: f64) -> RgbaImage {
    let mut img = RgbaImage::from_pixel(SIZE, SIZE, TRANSPARENT);
    let (xc, yc) = (SIZE as i32 / 2, SIZE as i32 / 2);

    draw_filled_circle_mut(&mut img, (xc, yc), RADIUS, LIT);
    let disc: Vec<bool> = img.pixels().map(|p| *p == LIT).collect();

    if !(NEW_BELOW..=NEW_ABOVE).contains(&age) {
        draw_filled_circle_mut(&mut img, (xc, yc), RADIUS, SHADOW);
    } else if age > FULL_WINDOW.0 && age < FULL_WINDOW.1 {
        // already fully lit
    } else {
        draw_polygon_mut(&mut img, &shadow_polygon(age, xc, yc), SHADOW);
    }

    for (pixel, inside) in img.pixels_mut().zip(disc) {
        if !inside {
            *pixel = TRANSPARENT;
        }
    }
    img
}

pub fn render_data_uri(age: f64) -> Result<String, image::ImageError> {
    png_data_uri(&render(age))
}

/// Left-hand box edge plus the terminator curve, north to south.
fn shadow_polygon(age: f64, xc: i32, yc: i32) -> Vec<Point<i32>> {
    let r = f64::from(RADIUS);
    let phase = (2.0 * PI * age / 28.0).cos();

    let mut pts = vec![
        Point::new(xc, yc - RADIUS - 5),
        Point::new(xc - RADIUS - 10, yc - RADIUS - 5),
        Point::new(xc - RADIUS - 10, yc + RADIUS + 5),
        Point::new(xc, yc + RADIUS + 5),
    ];
    pts.extend((0..180).step_by(5).map(|deg| {
        let th = f64::from(deg).to_radians();
        Point::new(
            (f64::from(xc) + r * th.sin() * phase) as i32,
            (f64::from(yc) + r * th.cos()) as i32,
        )
    }));
    pts
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count(img: &RgbaImage, colour: Rgba<u8>) -> usize {
        img.pixels().filter(|p| **p == colour).count()
    }

    #[test]
    fn size_is_fixed() {
        for age in [0.0, 3.5, 7.4, 14.77, 22.1, 29.53] {
            let img = render(age);
            assert_eq!(img.dimensions(), (SIZE, SIZE), "age {age}");
        }
    }

    #[test]
    fn new_moon_is_dark() {
        for age in [0.0, 0.1, 28.0, 29.53] {
            let img = render(age);
            assert_eq!(count(&img, LIT), 0, "age {age}");
            assert!(count(&img, SHADOW) > 0, "age {age}");
        }
    }

    #[test]
    fn full_moon_is_lit() {
        let img = render(14.77);
        assert_eq!(count(&img, SHADOW), 0);
        assert!(count(&img, LIT) > 6000);
    }

    #[test]
    fn corners_stay_transparent() {
        let img = render(5.0);
        for (x, y) in [(0, 0), (SIZE - 1, 0), (0, SIZE - 1), (SIZE - 1, SIZE - 1)] {
            assert_eq!(*img.get_pixel(x, y), TRANSPARENT);
        }
    }

    #[test]
    fn waxing_crescent_is_lit_on_the_right() {
        let img = render(4.0);
        let (lit, shadow) = (count(&img, LIT), count(&img, SHADOW));
        assert!(shadow > lit, "lit {lit} shadow {shadow}");
        assert_eq!(*img.get_pixel(10, 50), SHADOW);
        assert_eq!(*img.get_pixel(90, 50), LIT);
    }

    #[test]
    fn first_quarter_is_about_half_lit() {
        let img = render(7.0);
        let (lit, shadow) = (count(&img, LIT) as f64, count(&img, SHADOW) as f64);
        let ratio = lit / (lit + shadow);
        assert!((0.4..0.6).contains(&ratio), "ratio {ratio}");
    }

    #[test]
    fn data_uri_prefix() {
        let uri = render_data_uri(10.0).unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
    }
}
