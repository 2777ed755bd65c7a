//! Symbol extraction from raw signal text.
//!
//! Venues list low-priced coins with a quantity prefix ("1000PEPE",
//! "1000000MOG"). Signals copy that notation, so the prefix is split off into
//! a multiplier and the canonical ticker is put back into the text for the
//! downstream parsers.

use once_cell::sync::Lazy;
use regex::Regex;

/// Tickers recognised before the generic pattern. Order does not matter here,
/// the alternation is built longest-first.
pub const KNOWN_TICKERS: &[&str] = &[
    "BTC", "ETH", "SOL", "BNB", "XRP", "ADA", "DOGE", "AVAX", "DOT", "LINK", "LTC", "TRX",
    "MATIC", "POL", "ATOM", "NEAR", "APT", "ARB", "OP", "SUI", "SEI", "TIA", "INJ", "TON",
    "FIL", "ETC", "BCH", "UNI", "AAVE", "LDO", "WLD", "JUP", "PYTH", "ORDI", "STX", "HBAR",
    "PEPE", "SHIB", "BONK", "FLOKI", "WIF", "TOSHI", "MOG", "SATS", "RATS", "LUNC", "XEC",
    "BTT", "CAT", "NEIRO", "CHEEMS", "WHY", "X", "MEW", "BRETT", "TURBO", "POPCAT", "LADYS",
    "BABYDOGE", "COQ", "MUBARAK",
];

/// Quote suffixes dropped after a prefixed ticker ("1000PEPEUSDT")
const QUOTE_SUFFIXES: &str = "USDT|USDC|USD|PERP";

/// Words that look like tickers but never are
const NON_TICKER_WORDS: &[&str] = &[
    "LONG", "SHORT", "BUY", "SELL", "ENTRY", "ENTRIES", "SL", "TP", "STOP", "LOSS", "LIMIT",
    "MARKET", "SPOT", "BE", "TARGET", "TARGETS", "RISK", "LEVERAGE", "CROSS", "ISOLATED", "NOW",
    "ZONE", "CLOSE", "CLOSED", "HIT", "AND", "THE", "AT", "TO", "IN", "ON", "OF", "FOR", "USDT",
    "USD", "USDC", "PERP", "NEW", "SIGNAL", "TRADE", "UPDATE", "MOVE", "MOVED", "STOPS",
    "STOPPED", "BREAKEVEN", "ORDER", "FILLED", "CANCEL", "CANCELLED", "HIGH", "LOW", "MEDIUM",
    "DCA", "SETUP", "OPEN", "TAKE", "PROFIT", "SWING", "SCALP", "PAIR", "LEV", "SIZE",
];

static KNOWN_PREFIXED: Lazy<Regex> = Lazy::new(|| {
    let mut tickers: Vec<&str> = KNOWN_TICKERS.iter().copied().filter(|t| t.len() >= 2).collect();
    tickers.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    let pattern = format!(
        r"^([\s$#]*)(\d+)({})(?:{})?\b",
        tickers.join("|"),
        QUOTE_SUFFIXES
    );
    Regex::new(&pattern).expect("known ticker pattern is valid")
});

static GENERIC_PREFIXED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([\s$#]*)(\d+)([A-Z]{2,10})\b").expect("generic ticker pattern is valid"));

static TAGGED_TICKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[$#]([A-Za-z]{2,10})\b").expect("tagged ticker pattern is valid"));

static PAIR_TICKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z]{2,10})(?:/|-)?(?:USDT|USDC|USD|PERP)\b").expect("pair pattern is valid")
});

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[A-Za-z]{2,10}\b").expect("word pattern is valid"));

/// Result of [`SymbolExtractor::extract`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolExtraction {
    pub quantity: Option<u64>,
    pub symbol: Option<String>,
    pub cleaned_text: String,
}

impl SymbolExtraction {
    fn no_match(raw_text: &str) -> Self {
        Self {
            quantity: None,
            symbol: None,
            cleaned_text: raw_text.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolExtractor;

impl SymbolExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Splits a leading quantity prefix off the ticker.
    ///
    /// Known tickers are tried before the generic uppercase pattern so a
    /// prefix is never cut inside a known ticker.
    pub fn extract(&self, raw_text: &str) -> SymbolExtraction {
        for pattern in [&*KNOWN_PREFIXED, &*GENERIC_PREFIXED] {
            let Some(caps) = pattern.captures(raw_text) else {
                continue;
            };
            let (Some(whole), Some(lead), Some(digits), Some(ticker)) =
                (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
            else {
                continue;
            };

            let quantity = match digits.as_str().parse::<u64>() {
                Ok(q) if q > 0 => q,
                _ => return SymbolExtraction::no_match(raw_text),
            };
            let symbol = ticker.as_str().to_string();

            let mut cleaned = String::with_capacity(raw_text.len());
            cleaned.push_str(lead.as_str());
            cleaned.push_str(&symbol);
            cleaned.push_str(&raw_text[whole.end()..]);

            return SymbolExtraction {
                quantity: Some(quantity),
                symbol: Some(symbol),
                cleaned_text: cleaned,
            };
        }

        SymbolExtraction::no_match(raw_text)
    }

    /// Every plausible ticker in `text`, in order of first appearance.
    ///
    /// Tagged tickers ("$PEPE", "#BTC") and pairs ("ETHUSDT", "SOL/USDT") are
    /// reliable on their own; bare words only count when they are known
    /// tickers, or, failing that, when written in uppercase.
    pub fn candidates(&self, text: &str) -> Vec<String> {
        let mut found: Vec<(usize, String)> = Vec::new();

        for caps in TAGGED_TICKER.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                found.push((m.start(), m.as_str().to_uppercase()));
            }
        }
        for caps in PAIR_TICKER.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                let ticker = m.as_str().to_uppercase();
                if !NON_TICKER_WORDS.contains(&ticker.as_str()) {
                    found.push((m.start(), ticker));
                }
            }
        }
        for m in WORD.find_iter(text) {
            let upper = m.as_str().to_uppercase();
            if KNOWN_TICKERS.contains(&upper.as_str()) {
                found.push((m.start(), upper));
            }
        }

        if found.is_empty() {
            for m in WORD.find_iter(text) {
                let word = m.as_str();
                let is_upper = word.chars().all(|c| c.is_ascii_uppercase());
                if is_upper && !NON_TICKER_WORDS.contains(&word) {
                    found.push((m.start(), word.to_string()));
                }
            }
        }

        found.sort_by_key(|(pos, _)| *pos);
        let mut unique: Vec<String> = Vec::new();
        for (_, ticker) in found {
            if !unique.contains(&ticker) {
                unique.push(ticker);
            }
        }
        unique
    }

    /// Canonical ticker for a signal without a quantity prefix
    pub fn find_ticker(&self, text: &str) -> Option<String> {
        if let Some(symbol) = self.extract(text).symbol {
            return Some(symbol);
        }
        self.candidates(text).into_iter().next()
    }
}

pub fn is_known_ticker(symbol: &str) -> bool {
    KNOWN_TICKERS.contains(&symbol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_extract_toshi_signal() {
        let extraction = SymbolExtractor::new().extract("1000TOSHI|Entry:|0.7172|SL:|0.692");
        assert_eq!(extraction.quantity, Some(1000));
        assert_eq!(extraction.symbol.as_deref(), Some("TOSHI"));
        assert_eq!(extraction.cleaned_text, "TOSHI|Entry:|0.7172|SL:|0.692");
    }

    #[test]
    fn test_extract_never_splits_known_ticker() {
        let extractor = SymbolExtractor::new();
        for text in ["1000ETH long", "1000ETHUSDT short 3000", "10ETH"] {
            let extraction = extractor.extract(text);
            assert_eq!(extraction.symbol.as_deref(), Some("ETH"), "{}", text);
        }
    }

    #[test]
    fn test_extract_strips_quote_suffix() {
        let extraction = SymbolExtractor::new().extract("1000PEPEUSDT long 0.0123");
        assert_eq!(extraction.quantity, Some(1000));
        assert_eq!(extraction.symbol.as_deref(), Some("PEPE"));
        assert_eq!(extraction.cleaned_text, "PEPE long 0.0123");
    }

    #[test]
    fn test_extract_generic_ticker() {
        let extraction = SymbolExtractor::new().extract("$10000LADYZ short");
        assert_eq!(extraction.quantity, Some(10000));
        assert_eq!(extraction.symbol.as_deref(), Some("LADYZ"));
        assert_eq!(extraction.cleaned_text, "$LADYZ short");
    }

    #[test]
    fn test_extract_no_match() {
        let extractor = SymbolExtractor::new();
        let raw = "Shorted BTC 111100 sl 112392";
        assert_eq!(extractor.extract(raw), SymbolExtraction::no_match(raw));

        let lowercase = extractor.extract("1000toshi long");
        assert_eq!(lowercase.symbol, None);
    }

    #[test]
    fn test_extract_rejects_zero_quantity() {
        let extraction = SymbolExtractor::new().extract("0BTC long");
        assert_eq!(extraction.quantity, None);
        assert_eq!(extraction.cleaned_text, "0BTC long");
    }

    #[test]
    fn test_candidates_order_and_filtering() {
        let extractor = SymbolExtractor::new();
        assert_eq!(extractor.candidates("Shorted BTC 111100 sl 112392"), vec!["BTC"]);
        assert_eq!(extractor.candidates("LONG $wif now"), vec!["WIF"]);
        assert_eq!(extractor.candidates("ETH/USDT and SOLUSDT"), vec!["ETH", "SOL"]);
        assert_eq!(extractor.candidates("KAS long 0.12"), vec!["KAS"]);
        assert!(extractor.candidates("long now at market").is_empty());
    }

    #[test]
    fn test_find_ticker_prefers_prefix() {
        let extractor = SymbolExtractor::new();
        assert_eq!(extractor.find_ticker("1000BONK long").as_deref(), Some("BONK"));
        assert_eq!(extractor.find_ticker("btc long 100").as_deref(), Some("BTC"));
    }

    proptest! {
        #[test]
        fn prop_prefixed_known_ticker_extracts_exactly(
            quantity in 1u64..10_000_000,
            index in 0usize..KNOWN_TICKERS.len(),
            rest in "[ |][a-z0-9:. |]{0,20}",
        ) {
            let ticker = KNOWN_TICKERS[index];
            prop_assume!(ticker.len() >= 2);
            let text = format!("{}{}{}", quantity, ticker, rest);
            let extraction = SymbolExtractor::new().extract(&text);
            prop_assert_eq!(extraction.quantity, Some(quantity));
            prop_assert_eq!(extraction.symbol.as_deref(), Some(ticker));
            prop_assert_eq!(extraction.cleaned_text, format!("{}{}", ticker, rest));
        }
    }
}
