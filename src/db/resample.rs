use crate::error::QueryError;
use crate::models::{OhlcBucket, PriceSample};
use chrono::{DateTime, Duration, Utc};

/// Group price samples into fixed-width OHLC buckets aligned to `start`
///
/// Bucket `k` covers `[start + k*width, start + (k+1)*width)`. Samples outside
/// `[start, end]` are ignored and empty buckets are omitted. Input order does
/// not matter: samples are stably sorted by capture time first, so ties keep
/// their insertion order.
pub fn resample_ohlc(
    samples: &[PriceSample],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    bucket_width: Duration,
) -> Result<Vec<OhlcBucket>, QueryError> {
    if start > end {
        return Err(QueryError::InvertedRange { start, end });
    }
    let width_ms = bucket_width.num_milliseconds();
    if width_ms <= 0 {
        return Err(QueryError::NonPositiveBucket(bucket_width));
    }

    let mut in_range: Vec<&PriceSample> = samples
        .iter()
        .filter(|s| s.captured_at >= start && s.captured_at <= end)
        .collect();
    in_range.sort_by_key(|s| s.captured_at);

    let mut buckets: Vec<(i64, OhlcBucket)> = Vec::new();

    for sample in in_range {
        let offset = sample.captured_at.signed_duration_since(start);
        let index = offset.num_milliseconds() / width_ms;

        match buckets.last_mut() {
            Some((current, bucket)) if *current == index => {
                if sample.price > bucket.high {
                    bucket.high = sample.price;
                }
                if sample.price < bucket.low {
                    bucket.low = sample.price;
                }
                bucket.close = sample.price;
            }
            _ => {
                let bucket_start = start + Duration::milliseconds(index * width_ms);
                buckets.push((
                    index,
                    OhlcBucket {
                        bucket_start,
                        open: sample.price,
                        high: sample.price,
                        low: sample.price,
                        close: sample.price,
                    },
                ));
            }
        }
    }

    Ok(buckets.into_iter().map(|(_, bucket)| bucket).collect())
}
