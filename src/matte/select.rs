use crate::error::{RemovalError, Result};
use crate::segmentation::{Mask, Segment};

/// The one non-background segment chosen to drive the alpha channel.
#[derive(Debug, Clone, Copy)]
pub struct ForegroundMask<'a> {
    segment: &'a Segment,
}

impl<'a> ForegroundMask<'a> {
    pub fn label(&self) -> &'a str {
        &self.segment.label
    }

    pub fn mask(&self) -> &'a Mask {
        &self.segment.mask
    }

    pub fn segment(&self) -> &'a Segment {
        self.segment
    }
}

/// Pick the non-background segment with the largest mask buffer.
///
/// Area is mask width x height, not confidence-weighted. On a tie the
/// earliest segment in `segments` wins.
pub fn select_foreground(segments: &[Segment]) -> Result<ForegroundMask<'_>> {
    let mut best: Option<&Segment> = None;

    for segment in segments.iter().filter(|s| !s.is_background()) {
        match best {
            Some(current) if segment.mask.area() <= current.mask.area() => {}
            _ => best = Some(segment),
        }
    }

    let segment = best.ok_or(RemovalError::NoForeground)?;
    tracing::debug!(
        label = %segment.label,
        width = segment.mask.width(),
        height = segment.mask.height(),
        "selected foreground segment"
    );
    Ok(ForegroundMask { segment })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(label: &str, width: u32, height: u32) -> Segment {
        Segment::new(label, Mask::filled(width, height, 0.5).unwrap())
    }

    #[test]
    fn background_only_has_no_foreground() {
        let segments = vec![Segment::new("background", Mask::filled(4, 4, 1.0).unwrap())];
        let err = select_foreground(&segments).unwrap_err();
        assert_eq!(err, RemovalError::NoForeground);
    }

    #[test]
    fn empty_result_has_no_foreground() {
        assert_eq!(
            select_foreground(&[]).unwrap_err(),
            RemovalError::NoForeground
        );
    }

    #[test]
    fn largest_area_wins() {
        let segments = vec![
            segment("hat", 2, 2),
            segment("background", 10, 10),
            segment("dress", 3, 4),
            segment("bag", 2, 5),
        ];
        assert_eq!(select_foreground(&segments).unwrap().label(), "dress");
    }

    #[test]
    fn tie_keeps_first_in_input_order() {
        let segments = vec![segment("left-arm", 4, 2), segment("right-arm", 2, 4)];
        let chosen = select_foreground(&segments).unwrap();
        assert_eq!(chosen.label(), "left-arm");
        assert!(std::ptr::eq(chosen.segment(), &segments[0]));
    }

    #[test]
    fn selection_is_deterministic() {
        let segments = vec![
            segment("face", 3, 3),
            segment("hair", 3, 3),
            segment("background", 3, 3),
        ];
        let first = select_foreground(&segments).unwrap();
        let second = select_foreground(&segments).unwrap();
        assert_eq!(first.label(), second.label());
        assert!(std::ptr::eq(first.mask(), second.mask()));
    }
}
