//! Chapter URL arithmetic.
//! The chapter number is the last run of ASCII digits in the URL. Chapters are
//! 1-indexed, so stepping back from chapter 1 is an error.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{Result, TranslateError};

/// Lowest chapter number a URL may point at.
pub const MIN_CHAPTER: u64 = 1;

fn digit_runs() -> &'static Regex {
    static DIGITS: OnceLock<Regex> = OnceLock::new();
    DIGITS.get_or_init(|| Regex::new(r"\d+").expect("digit pattern is valid"))
}

/// Chapter number encoded in `url`.
pub fn chapter_number(url: &str) -> Result<u64> {
    let run = digit_runs()
        .find_iter(url)
        .last()
        .ok_or_else(|| TranslateError::InvalidChapterUrl(url.to_string()))?;
    run.as_str()
        .parse()
        .map_err(|_| TranslateError::InvalidChapterUrl(url.to_string()))
}

/// URL of the chapter after the one in `url`.
pub fn next_url(url: &str) -> Result<String> {
    shift_chapter(url, 1)
}

/// URL of the chapter before the one in `url`.
pub fn previous_url(url: &str) -> Result<String> {
    shift_chapter(url, -1)
}

fn shift_chapter(url: &str, delta: i128) -> Result<String> {
    let run = digit_runs()
        .find_iter(url)
        .last()
        .ok_or_else(|| TranslateError::InvalidChapterUrl(url.to_string()))?;
    let digits = run.as_str();
    let current: u64 = digits
        .parse()
        .map_err(|_| TranslateError::InvalidChapterUrl(url.to_string()))?;

    let shifted = i128::from(current) + delta;
    if shifted < i128::from(MIN_CHAPTER) {
        return Err(TranslateError::InvalidChapterNumber(shifted));
    }

    // Zero-padded numbering keeps its width: chap-009 -> chap-010.
    let rendered = if digits.len() > 1 && digits.starts_with('0') {
        format!("{:0width$}", shifted, width = digits.len())
    } else {
        shifted.to_string()
    };

    let mut out = String::with_capacity(url.len() + 1);
    out.push_str(&url[..run.start()]);
    out.push_str(&rendered);
    out.push_str(&url[run.end()..]);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_increments_trailing_chapter() {
        assert_eq!(
            next_url("https://truyenyy.vip/truyen/thinh-cong-tu-tram-yeu/chuong-309.html").unwrap(),
            "https://truyenyy.vip/truyen/thinh-cong-tu-tram-yeu/chuong-310.html"
        );
        assert_eq!(
            next_url("https://www.bq01.cc/index/38697/73.html").unwrap(),
            "https://www.bq01.cc/index/38697/74.html"
        );
    }

    #[test]
    fn previous_decrements_trailing_chapter() {
        assert_eq!(
            previous_url("https://site/novel/chap-10.html").unwrap(),
            "https://site/novel/chap-9.html"
        );
    }

    #[test]
    fn replaces_the_chapter_not_an_earlier_identical_number() {
        assert_eq!(
            next_url("https://www.bq01.cc/index/73/73.html").unwrap(),
            "https://www.bq01.cc/index/73/74.html"
        );
        assert_eq!(
            previous_url("https://site/5/chapter-5").unwrap(),
            "https://site/5/chapter-4"
        );
    }

    #[test]
    fn round_trip_restores_chapter() {
        for url in [
            "https://site/novel/chap-2.html",
            "https://site/novel/chap-10.html",
            "https://site/book/99/chapter-1000",
        ] {
            let n = chapter_number(url).unwrap();
            let forward_back = previous_url(&next_url(url).unwrap()).unwrap();
            let back_forward = next_url(&previous_url(url).unwrap()).unwrap();
            assert_eq!(chapter_number(&forward_back).unwrap(), n);
            assert_eq!(chapter_number(&back_forward).unwrap(), n);
            assert_eq!(forward_back, url);
            assert_eq!(back_forward, url);
        }
    }

    #[test]
    fn previous_of_first_chapter_fails() {
        match previous_url("https://site/novel/chap-1.html") {
            Err(TranslateError::InvalidChapterNumber(n)) => assert_eq!(n, 0),
            other => panic!("expected InvalidChapterNumber, got {other:?}"),
        }
        assert!(matches!(
            previous_url("https://site/novel/chap-0.html"),
            Err(TranslateError::InvalidChapterNumber(-1))
        ));
    }

    #[test]
    fn url_without_digits_is_rejected() {
        assert!(matches!(
            next_url("https://site/novel/prologue.html"),
            Err(TranslateError::InvalidChapterUrl(_))
        ));
        assert!(matches!(
            chapter_number(""),
            Err(TranslateError::InvalidChapterUrl(_))
        ));
    }

    #[test]
    fn oversized_digit_run_is_rejected() {
        let url = "https://site/chap-123456789012345678901234567890";
        assert!(matches!(
            next_url(url),
            Err(TranslateError::InvalidChapterUrl(_))
        ));
    }

    #[test]
    fn zero_padded_width_is_kept() {
        assert_eq!(next_url("https://site/chap-009").unwrap(), "https://site/chap-010");
        assert_eq!(previous_url("https://site/chap-010").unwrap(), "https://site/chap-009");
        assert_eq!(previous_url("https://site/chap-100").unwrap(), "https://site/chap-99");
    }
}
