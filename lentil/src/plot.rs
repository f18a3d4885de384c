use crate::qc::{Ecdf, Histogram};
use plotters::prelude::*;
use std::path::Path;

pub struct FigureLabels<'a> {
    pub title: &'a str,
    pub x_label: &'a str,
    pub y_label: &'a str,
}

/// Renders QC figures; the QC code only prepares the numbers
pub trait FigureBackend {
    /// file extension of the figures, e.g. "svg"
    fn extension(&self) -> &'static str;

    fn histogram(&self, hist: &Histogram, labels: &FigureLabels, out: &Path) -> anyhow::Result<()>;

    fn scatter(&self, points: &[(f32, f32)], labels: &FigureLabels, out: &Path)
        -> anyhow::Result<()>;

    /// ECDF with an optional vertical marker (e.g., at the threshold)
    fn ecdf(
        &self,
        ecdf: &Ecdf,
        marker: Option<f32>,
        labels: &FigureLabels,
        out: &Path,
    ) -> anyhow::Result<()>;
}

/// `plotters` figures written as SVG
pub struct SvgFigures {
    pub width: u32,
    pub height: u32,
}

impl Default for SvgFigures {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

fn padded_range(lo: f32, hi: f32) -> std::ops::Range<f32> {
    if hi > lo {
        let pad = (hi - lo) * 0.02;
        (lo - pad)..(hi + pad)
    } else {
        (lo - 0.5)..(hi + 0.5)
    }
}

impl FigureBackend for SvgFigures {
    fn extension(&self) -> &'static str {
        "svg"
    }

    fn histogram(&self, hist: &Histogram, labels: &FigureLabels, out: &Path) -> anyhow::Result<()> {
        let ymax = hist.counts.iter().copied().max().unwrap_or(0).max(1) as f32;

        let root = SVGBackend::new(out, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(labels.title, ("sans-serif", 20))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(hist.lower..hist.upper, 0f32..(ymax * 1.05))?;

        chart
            .configure_mesh()
            .disable_x_mesh()
            .x_desc(labels.x_label)
            .y_desc(labels.y_label)
            .draw()?;

        chart.draw_series(hist.bins().filter(|&(_, _, n)| n > 0).map(|(lb, ub, n)| {
            Rectangle::new([(lb, 0f32), (ub, n as f32)], BLUE.mix(0.6).filled())
        }))?;

        root.present()?;
        Ok(())
    }

    fn scatter(
        &self,
        points: &[(f32, f32)],
        labels: &FigureLabels,
        out: &Path,
    ) -> anyhow::Result<()> {
        let (mut x0, mut x1, mut y0, mut y1) = (0f32, 1f32, 0f32, 1f32);
        for &(x, y) in points {
            x0 = x0.min(x);
            x1 = x1.max(x);
            y0 = y0.min(y);
            y1 = y1.max(y);
        }

        let root = SVGBackend::new(out, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(labels.title, ("sans-serif", 20))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(padded_range(x0, x1), padded_range(y0, y1))?;

        chart
            .configure_mesh()
            .x_desc(labels.x_label)
            .y_desc(labels.y_label)
            .draw()?;

        chart.draw_series(
            points
                .iter()
                .map(|&(x, y)| Circle::new((x, y), 1, BLUE.mix(0.5).filled())),
        )?;

        root.present()?;
        Ok(())
    }

    fn ecdf(
        &self,
        ecdf: &Ecdf,
        marker: Option<f32>,
        labels: &FigureLabels,
        out: &Path,
    ) -> anyhow::Result<()> {
        let x0 = ecdf.x.first().copied().unwrap_or(0.0).min(0.0);
        let x1 = ecdf.x.last().copied().unwrap_or(1.0).max(1.0);

        let root = SVGBackend::new(out, (self.width, self.height)).into_drawing_area();
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption(labels.title, ("sans-serif", 20))
            .margin(10)
            .x_label_area_size(40)
            .y_label_area_size(50)
            .build_cartesian_2d(padded_range(x0, x1), 0f32..1.02f32)?;

        chart
            .configure_mesh()
            .x_desc(labels.x_label)
            .y_desc(labels.y_label)
            .draw()?;

        // right-continuous steps
        let mut steps = vec![(x0, 0f32)];
        let mut prev = 0f32;
        for (&x, &y) in ecdf.x.iter().zip(ecdf.y.iter()) {
            steps.push((x, prev));
            steps.push((x, y));
            prev = y;
        }
        steps.push((x1, prev));

        chart.draw_series(LineSeries::new(steps, &BLUE))?;

        if let Some(t) = marker {
            chart.draw_series(LineSeries::new(vec![(t, 0f32), (t, 1f32)], &RED))?;
        }

        root.present()?;
        Ok(())
    }
}
