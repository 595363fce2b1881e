/*
 *  draw.rs
 *
 *  InfoCube - plugin driven LED matrix display
 *  (c) 2020-26 Stuart Hunter
 *
 *  Drawing helpers shared by the plugins
 *
 *  This program is free software: you can redistribute it and/or modify
 *  it under the terms of the GNU General Public License as published by
 *  the Free Software Foundation, either version 3 of the License, or
 *  (at your option) any later version.
 *
 *  This program is distributed in the hope that it will be useful,
 *  but WITHOUT ANY WARRANTY; without even the implied warranty of
 *  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 *  GNU General Public License for more details.
 *
 *  See <http://www.gnu.org/licenses/> to get a copy of the GNU General
 *  Public License.
 *
 */

use embedded_graphics::{
    mono_font::{MonoFont, MonoTextStyle, ascii::FONT_4X6},
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{Line, PrimitiveStyle, Rectangle},
    text::{Alignment, Baseline, Text, TextStyleBuilder},
};
use std::time::Duration;

pub const WHITE: Rgb888 = Rgb888::new(255, 255, 255);
pub const GRAY: Rgb888 = Rgb888::new(128, 128, 128);
pub const RED: Rgb888 = Rgb888::new(255, 0, 0);
pub const GREEN: Rgb888 = Rgb888::new(0, 255, 0);
pub const YELLOW: Rgb888 = Rgb888::new(255, 255, 0);
pub const ORANGE: Rgb888 = Rgb888::new(255, 165, 0);
pub const SKY_BLUE: Rgb888 = Rgb888::new(135, 206, 235);
pub const LIGHT_BLUE: Rgb888 = Rgb888::new(173, 216, 230);
pub const PINK: Rgb888 = Rgb888::new(255, 182, 193);
pub const LIME: Rgb888 = Rgb888::new(50, 205, 50);

/// Pixel width of `text` set in `font`.
pub fn text_width(text: &str, font: &MonoFont) -> u32 {
    let n = text.chars().count() as u32;
    if n == 0 {
        return 0;
    }
    n * font.character_size.width + (n - 1) * font.character_spacing
}

/// Longest prefix of `text` that fits in `width` pixels.
pub fn fit_text(text: &str, font: &MonoFont, width: u32) -> String {
    let advance = font.character_size.width + font.character_spacing;
    let max = ((width + font.character_spacing) / advance.max(1)) as usize;
    text.chars().take(max).collect()
}

/// Largest of `fonts` (ordered largest first) that fits `text` into
/// `width`, else the last one.
pub fn pick_font<'a>(text: &str, width: u32, fonts: &[&'a MonoFont<'a>]) -> &'a MonoFont<'a> {
    fonts
        .iter()
        .copied()
        .find(|f| text_width(text, f) <= width)
        .or_else(|| fonts.last().copied())
        .unwrap_or(&FONT_4X6)
}

/// Draws text with its top-left corner at (x, y).
pub fn draw_text<D>(target: &mut D, text: &str, x: i32, y: i32, font: &MonoFont, color: Rgb888) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb888>,
{
    Text::with_baseline(text, Point::new(x, y), MonoTextStyle::new(font, color), Baseline::Top)
        .draw(target)?;
    Ok(())
}

/// Draws text horizontally centered on the target, top at `y`.
pub fn draw_text_centered<D>(target: &mut D, text: &str, y: i32, font: &MonoFont, color: Rgb888) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb888> + OriginDimensions,
{
    let cx = target.size().width as i32 / 2;
    let style = TextStyleBuilder::new()
        .alignment(Alignment::Center)
        .baseline(Baseline::Top)
        .build();
    Text::with_text_style(text, Point::new(cx, y), MonoTextStyle::new(font, color), style)
        .draw(target)?;
    Ok(())
}

/// Text with a one pixel outline so it reads over busy backgrounds.
pub fn draw_text_outlined<D>(
    target: &mut D,
    text: &str,
    x: i32,
    y: i32,
    font: &MonoFont,
    color: Rgb888,
    outline: Rgb888,
) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb888>,
{
    for dy in -1..=1 {
        for dx in -1..=1 {
            if dx != 0 || dy != 0 {
                draw_text(target, text, x + dx, y + dy, font, outline)?;
            }
        }
    }
    draw_text(target, text, x, y, font, color)
}

/// Two centered lines shown when a plugin has nothing to draw yet.
pub fn draw_placeholder<D>(target: &mut D, title: &str, detail: &str, font: &MonoFont, color: Rgb888) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb888> + OriginDimensions,
{
    let h = target.size().height as i32;
    let line = font.character_size.height as i32 + 1;
    let top = (h - 2 * line) / 2;
    draw_text_centered(target, title, top.max(0), font, color)?;
    draw_text_centered(target, detail, top.max(0) + line, font, GRAY)
}

/// Polyline of `series` scaled into `area`.
pub fn draw_sparkline<D>(target: &mut D, series: &[f64], area: Rectangle, color: Rgb888) -> Result<(), D::Error>
where
    D: DrawTarget<Color = Rgb888>,
{
    if series.len() < 2 || area.size.width < 2 || area.size.height < 2 {
        return Ok(());
    }
    let (lo, hi) = series.iter().fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let span = if hi - lo > f64::EPSILON { hi - lo } else { 1.0 };
    let w = (area.size.width - 1) as f64;
    let h = (area.size.height - 1) as f64;
    let last = (series.len() - 1) as f64;

    let point = |i: usize, v: f64| {
        let x = area.top_left.x + (i as f64 / last * w).round() as i32;
        let y = area.top_left.y + (h - (v - lo) / span * h).round() as i32;
        Point::new(x, y)
    };
    let style = PrimitiveStyle::with_stroke(color, 1);
    for i in 1..series.len() {
        Line::new(point(i - 1, series[i - 1]), point(i, series[i]))
            .into_styled(style)
            .draw(target)?;
    }
    Ok(())
}

/// Horizontal offset of a marquee that scrolls `content` pixels of text
/// through a `window` wide area at `speed` px/s, wrapping forever.
pub fn marquee_offset(content: u32, window: u32, elapsed: Duration, speed: u32) -> i32 {
    if content <= window {
        return 0;
    }
    let travel = (content + window) as u64;
    let px = (elapsed.as_millis() as u64 * speed.max(1) as u64 / 1000) % travel;
    window as i32 - px as i32
}

/// Scale a color, 0..=255 where 255 leaves it unchanged.
pub fn dim(c: Rgb888, level: u8) -> Rgb888 {
    let f = |v: u8| (v as u16 * level as u16 / 255) as u8;
    Rgb888::new(f(c.r()), f(c.g()), f(c.b()))
}
