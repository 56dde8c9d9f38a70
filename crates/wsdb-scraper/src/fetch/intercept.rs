//! Anti-bot interception signatures.
//!
//! Pure text predicates: no network or browser state, so every signature can
//! be unit tested against captured page bodies.

/// Substrings that on their own identify a challenge or block page.
const STRONG_MARKERS: &[&str] = &[
    "attention required! | cloudflare",
    "/cdn-cgi/challenge-platform/",
    "/_____tmd_____/punish",
    "x5secdata",
    "baxia-punish",
    "nc_1_nocaptcha",
    "errors.edgesuite.net",
    "px-captcha",
    "g-recaptcha",
    "h-captcha",
];

/// Phrases that only count as interception on a near-empty document, since
/// product copy can legitimately mention them.
const SOFT_MARKERS: &[&str] = &[
    "just a moment...",
    "please enable cookies",
    "verify you are human",
    "slide to verify",
    "unusual traffic",
    "access denied",
    "are you a robot",
    "security check",
];

/// Pages shorter than this with a soft marker are treated as interstitials.
const INTERSTITIAL_MAX_TEXT: usize = 4_000;

/// Returns `true` when `html` looks like an anti-bot challenge, captcha, or
/// block page rather than real marketplace content.
#[must_use]
pub fn looks_intercepted(html: &str) -> bool {
    let lowered = html.to_ascii_lowercase();

    if STRONG_MARKERS.iter().any(|m| lowered.contains(m)) {
        return true;
    }

    let has_just_a_moment = lowered.contains("just a moment...");
    if has_just_a_moment && (lowered.contains("cf-chl-") || lowered.contains("please enable cookies")) {
        return true;
    }

    let soft_hits = SOFT_MARKERS.iter().filter(|m| lowered.contains(*m)).count();
    soft_hits > 0 && visible_text_len(&lowered) < INTERSTITIAL_MAX_TEXT
}

/// Returns `true` when a redirect landed on a login, captcha, or punish URL.
#[must_use]
pub fn looks_intercepted_url(final_url: &str) -> bool {
    let lowered = final_url.to_ascii_lowercase();
    ["/punish", "captcha", "/login", "passport.", "login.", "/sec/verify"]
        .iter()
        .any(|m| lowered.contains(m))
}

/// Rough length of the text outside tags and script/style bodies.
fn visible_text_len(lowered: &str) -> usize {
    let mut len = 0usize;
    let mut in_tag = false;
    let mut rest = lowered;
    while let Some(c) = rest.chars().next() {
        if !in_tag && (rest.starts_with("<script") || rest.starts_with("<style")) {
            let close = if rest.starts_with("<script") { "</script>" } else { "</style>" };
            match rest.find(close) {
                Some(end) => {
                    rest = &rest[end + close.len()..];
                    continue;
                }
                None => break,
            }
        }
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag && !c.is_whitespace() => len += 1,
            _ => {}
        }
        rest = &rest[c.len_utf8()..];
    }
    len
}
