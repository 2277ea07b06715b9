//! Reverses the JavaScript obfuscation found on embed pages.
//!
//! Two schemes are handled: Dean Edwards' `eval(function(p,a,c,k,e,d){...})` packer, and the
//! `eval(function(h,u,n,t,e,r){...})` positional numeral encoder ("hunter"). Both frequently wrap each
//! other, so [`deobfuscate`] applies them repeatedly, up to [`MAX_ROUNDS`].

use std::borrow::Cow;
use std::collections::HashMap;
use std::num::NonZeroUsize;

use once_cell::sync::Lazy;
use regex::Regex;

pub const MAX_ROUNDS: usize = 2;

static PACKED_SIGNATURE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"eval\(\s*function\s*\(\s*p\s*,\s*a\s*,\s*c\s*,\s*k\s*,\s*e\s*,\s*[rd]\s*\)").unwrap());
static HUNTER_SIGNATURE_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"eval\(\s*function\s*\(\s*h\s*,\s*u\s*,\s*n\s*,\s*t\s*,\s*e\s*,\s*r\s*\)").unwrap());

pub fn detect_packed(source: &str) -> bool {
    PACKED_SIGNATURE_REGEX.is_match(source)
}

pub fn detect_hunter(source: &str) -> bool {
    HUNTER_SIGNATURE_REGEX.is_match(source)
}

/// Unwraps every known obfuscation layer, at most [`MAX_ROUNDS`] times.
///
/// Returns the input unchanged when nothing is recognised.
pub fn deobfuscate(source: &str) -> Cow<'_, str> {
    let mut current = Cow::Borrowed(source);

    for round in 1..=MAX_ROUNDS {
        let next = if detect_hunter(&current) {
            decode_hunter(&current)
        } else if detect_packed(&current) {
            unpack(&current)
        } else {
            None
        };

        match next {
            Some(next) => {
                log::trace!("Deobfuscation round {round}: {} -> {} bytes", current.len(), next.len());
                current = Cow::Owned(next);
            }
            None => break,
        }
    }

    current
}

const ALPHABET_62: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHABET_95: &[u8] = br##" !"#$%&'()*+,-./0123456789:;<=>?@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\]^_`abcdefghijklmnopqrstuvwxyz{|}~"##;

/// Port of https://github.com/yt-dlp/yt-dlp/blob/4e38e2ae9d7380015349e6aee59c78bb3938befd/yt_dlp/utils/_utils.py#L4364-L4374
///
/// Bases above 62 use the printable ASCII alphabet of the packer's "high ASCII" mode.
pub fn encode_base_n(mut num: usize, base: NonZeroUsize) -> Option<String> {
    let base = base.get();
    let table = if base <= ALPHABET_62.len() { ALPHABET_62 } else { ALPHABET_95 };
    if base > table.len() {
        return None;
    }

    if num == 0 {
        return Some((table[0] as char).to_string());
    }

    let mut digits = Vec::new();
    while num > 0 {
        digits.push(table[num % base]);
        num /= base;
    }
    digits.reverse();

    String::from_utf8(digits).ok()
}

/// Unpacks one layer of `eval(function(p,a,c,k,e,d){...}('payload',radix,count,'words'.split('|')))`.
///
/// Payload and word list may use either quote style, and the word list may also be an array literal
/// such as `['w0','w1']`. A radix of `[]` means 62. Tokens without a dictionary entry are left as they are.
pub fn unpack(source: &str) -> Option<String> {
    static PACKED_ARGS_REGEX: Lazy<Regex> = Lazy::new(|| {
        Regex::new(concat!(
            r#"(?s)\}\s*\(\s*(?:'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)")"#,
            r#"\s*,\s*(\d+|\[\])\s*,\s*(\d+)\s*,\s*"#,
            r#"(?:'((?:[^'\\]|\\.)*)'\.split\(\s*'\|'\s*\)"#,
            r#"|"((?:[^"\\]|\\.)*)"\.split\(\s*"\|"\s*\)"#,
            r#"|\[((?:[^\]'"]|'(?:[^'\\]|\\.)*'|"(?:[^"\\]|\\.)*")*)\])"#,
        ))
        .unwrap()
    });
    static ARRAY_ITEM_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"'((?:[^'\\]|\\.)*)'|"((?:[^"\\]|\\.)*)""#).unwrap());
    static WORD_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\w+\b").unwrap());

    let captures = PACKED_ARGS_REGEX.captures(source)?;
    let payload = unescape_js_string(captures.get(1).or_else(|| captures.get(2))?.as_str());
    let radix = match captures.get(3)?.as_str() {
        "[]" => NonZeroUsize::new(62)?,
        radix => radix.parse::<NonZeroUsize>().ok()?,
    };
    let count = captures.get(4)?.as_str().parse::<usize>().ok()?;

    let words = if let Some(words) = captures.get(5).or_else(|| captures.get(6)) {
        unescape_js_string(words.as_str())
            .split('|')
            .map(str::to_string)
            .collect::<Vec<_>>()
    } else {
        ARRAY_ITEM_REGEX
            .captures_iter(captures.get(7)?.as_str())
            .filter_map(|item| item.get(1).or_else(|| item.get(2)))
            .map(|item| unescape_js_string(item.as_str()).into_owned())
            .collect()
    };

    let mut dictionary = HashMap::with_capacity(count);
    for index in 0..count {
        let token = encode_base_n(index, radix)?;
        if let Some(word) = words.get(index).filter(|word| !word.is_empty()) {
            dictionary.insert(token, word.as_str());
        }
    }

    let unpacked = WORD_REGEX.replace_all(&payload, |captures: &regex::Captures| {
        let token = &captures[0];
        dictionary.get(token).copied().unwrap_or(token).to_string()
    });

    Some(unpacked.into_owned())
}

/// Decodes `eval(function(h,u,n,t,e,r){...}("encoded",_,"magic",offset,limit,_))`.
///
/// The encoded string is a list of numbers separated by `magic[limit]`. Each digit of a number is written
/// as the character at that index of `magic`, in base `limit`. Subtracting `offset` gives one byte; the
/// bytes form UTF-8 text.
pub fn decode_hunter(source: &str) -> Option<String> {
    static HUNTER_ARGS_REGEX: Lazy<Regex> =
        Lazy::new(|| Regex::new(r#"\}\(\s*"([^"]*)"\s*,\s*\d+\s*,\s*"([^"]+)"\s*,\s*(\d+)\s*,\s*(\d+)\s*,\s*\d+\s*\)\)"#).unwrap());

    let captures = HUNTER_ARGS_REGEX.captures(source)?;
    let encoded = captures.get(1)?.as_str();
    let magic = captures.get(2)?.as_str().chars().collect::<Vec<_>>();
    let offset = captures.get(3)?.as_str().parse::<u32>().ok()?;
    let limit = captures.get(4)?.as_str().parse::<usize>().ok()?;

    if limit < 2 || limit >= magic.len() {
        return None;
    }

    let separator = magic[limit];
    let mut bytes = Vec::with_capacity(encoded.len() / 2);

    for chunk in encoded.split(separator).filter(|chunk| !chunk.is_empty()) {
        let mut value = 0u32;
        for c in chunk.chars() {
            let digit = magic[..limit].iter().position(|&m| m == c)?;
            value = value.checked_mul(limit as u32)?.checked_add(digit as u32)?;
        }
        let byte = value.checked_sub(offset)?;
        bytes.push(u8::try_from(byte).ok()?);
    }

    String::from_utf8(bytes).ok()
}

fn unescape_js_string(input: &str) -> Cow<'_, str> {
    if !input.contains('\\') {
        return Cow::Borrowed(input);
    }

    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            output.push(c);
            continue;
        }

        match chars.next() {
            Some('n') => output.push('\n'),
            Some('r') => output.push('\r'),
            Some('t') => output.push('\t'),
            Some(other) => output.push(other),
            None => output.push('\\'),
        }
    }

    Cow::Owned(output)
}

/// Inverse of [`decode_hunter`], for building fixtures.
#[cfg(test)]
pub(crate) fn hunter_encode(code: &str, magic: &str, offset: u32, limit: u32) -> String {
    let magic = magic.chars().collect::<Vec<_>>();
    let mut encoded = String::new();

    for byte in code.bytes() {
        let mut value = byte as u32 + offset;
        let mut digits = Vec::new();
        while value > 0 {
            digits.push(magic[(value % limit) as usize]);
            value /= limit;
        }
        encoded.extend(digits.iter().rev());
        encoded.push(magic[limit as usize]);
    }

    format!(
        r#"eval(function(h,u,n,t,e,r){{r="";return decodeURIComponent(escape(r))}}("{encoded}",63,"{}",{offset},{limit},22))"#,
        magic.iter().collect::<String>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const HUNTER_MAGIC: &str = "xKdRrNwjq";

    fn pack_without_words(code: &str) -> String {
        let escaped = code.replace('\\', r"\\").replace('\'', r"\'");
        format!("eval(function(p,a,c,k,e,d){{return p}}('{escaped}',10,0,''.split('|'),0,{{}}))")
    }

    #[test]
    fn test_unpack() {
        let input = r#"eval(function(p,a,c,k,e,r){e=String;if(!''.replace(/^/,String)){while(c--)r[c]=k[c]||c;k=[function(e){return r[e]}];e=function(){return'\\w+'};c=1};while(c--)if(k[c])p=p.replace(new RegExp('\\b'+e(c)+'\\b','g'),k[c]);return p}('(0(){4 1="5 6 7 8";0 2(3){9(3)}2(1)})();',10,10,'function|b|something|a|var|some|sample|packed|code|alert'.split('|'),0,{}))"#;
        let expected = r#"(function(){var b="some sample packed code";function something(a){alert(a)}something(b)})();"#;

        assert!(detect_packed(input));
        assert_eq!(unpack(input).as_deref(), Some(expected));
    }

    #[test]
    fn test_unpack_secret_url() {
        let input = r#"eval(function(p,a,c,k,e,d){while(c--)if(k[c])p=p.replace(new RegExp('\\b'+c.toString(a)+'\\b','g'),k[c]);return p}('3 0="1.2";',4,4,'x|secret_url|mp4|var'.split('|'),0,{}))"#;

        let unpacked = deobfuscate(input);

        assert!(unpacked.contains("secret_url.mp4"));
        assert_eq!(unpacked, r#"var x="secret_url.mp4";"#);
    }

    #[test]
    fn test_unpack_keeps_unknown_tokens_and_unescapes() {
        let input = r"eval(function(p,a,c,k,e,d){return p}('0(\'1\', zz, 2)',36,3,'alert|hi|'.split('|'),0,{}))";
        assert_eq!(unpack(input).as_deref(), Some("alert('hi', zz, 2)"));
    }

    #[test]
    fn test_encode_base_n() {
        let base = |n| NonZeroUsize::new(n).unwrap();
        assert_eq!(encode_base_n(0, base(36)).as_deref(), Some("0"));
        assert_eq!(encode_base_n(35, base(36)).as_deref(), Some("z"));
        assert_eq!(encode_base_n(61, base(62)).as_deref(), Some("Z"));
        assert_eq!(encode_base_n(62, base(62)).as_deref(), Some("10"));
        assert_eq!(encode_base_n(33, base(95)).as_deref(), Some("A"));
        assert_eq!(encode_base_n(95, base(95)).as_deref(), Some("! "));
        assert_eq!(encode_base_n(1, base(96)), None);
    }

    #[test]
    fn test_unpack_array_dictionary() {
        let input = r#"eval(function(p,a,c,k,e,d){while(c--)if(k[c])p=p.replace(new RegExp('\b'+c.toString(a)+'\b','g'),k[c]);return p}('3 0="1.2";',4,4,['x','secret_url',"mp4",'var'],0,{}))"#;

        assert_eq!(deobfuscate(input), r#"var x="secret_url.mp4";"#);
    }

    #[test]
    fn test_unpack_double_quoted_dictionary() {
        let input = r#"eval(function(p,a,c,k,e,d){return p}("3 0='1.2';",4,4,"x|secret_url|mp4|var".split("|"),0,{}))"#;

        assert_eq!(deobfuscate(input), "var x='secret_url.mp4';");
    }

    #[test]
    fn test_unpack_empty_array_radix() {
        let words = format!("{}alert", "|".repeat(61));
        let input = format!("eval(function(p,a,c,k,e,d){{return p}}('Z(a)',[],62,'{words}'.split('|'),0,{{}}))");

        assert_eq!(unpack(&input).as_deref(), Some("alert(a)"));
    }

    #[test]
    fn test_unpack_base_95() {
        let mut words = vec![""; 35];
        words[33] = "hello";
        words[34] = "world";
        let input = format!(
            "eval(function(p,a,c,k,e,d){{return p}}('A B',95,35,'{}'.split('|'),0,{{}}))",
            words.join("|")
        );

        assert_eq!(unpack(&input).as_deref(), Some("hello world"));
    }

    #[test]
    fn test_decode_hunter() {
        let encoded = "KxdxNrdrNKxKKNKrrNKxKdNKxKKNrRKNRxRNdxKNrrKNKxKRNKxKRNKxxrNKxKdNRxxNddrNddrNrRKNrRdNKxxdNddRNrRRNKxddNrdrNKxxKNKxxrNKxxxNrRRNddRNrRKNKxxRNKxxKNddrNrdrNddRNKxxKNKxxrNdRrNdxKNRxKN";
        let input = format!(
            r#"<script>eval(function(h,u,n,t,e,r){{r="";return decodeURIComponent(escape(r))}}("{encoded}",63,"{HUNTER_MAGIC}",17,5,22))</script>"#
        );

        assert!(detect_hunter(&input));
        assert_eq!(
            decode_hunter(&input).as_deref(),
            Some(r#"var src="https://cdn.example.com/a.mp4";"#)
        );
    }

    #[test]
    fn test_decode_hunter_multibyte() {
        let input = hunter_encode("label:\"Über\"", HUNTER_MAGIC, 40, 7);
        assert_eq!(decode_hunter(&input).as_deref(), Some("label:\"Über\""));
    }

    #[test]
    fn test_chain_hunter_then_packer() {
        let packed = r#"eval(function(p,a,c,k,e,d){while(c--)if(k[c])p=p.replace(new RegExp('\\b'+c.toString(a)+'\\b','g'),k[c]);return p}('0.1({2:[{3:"4://5.6/7.8",9:"a"}]});',11,11,'player|setup|sources|file|https|cdn|example|movie|mp4|label|720p'.split('|')))"#;
        let input = hunter_encode(packed, HUNTER_MAGIC, 17, 5);

        assert_eq!(
            deobfuscate(&input),
            r#"player.setup({sources:[{file:"https://cdn.example/movie.mp4",label:"720p"}]});"#
        );
    }

    #[test]
    fn test_chain_stops_after_max_rounds() {
        let clear = "var a=1;";
        let triple = pack_without_words(&pack_without_words(&pack_without_words(clear)));

        assert_eq!(deobfuscate(&triple), pack_without_words(clear));
    }

    #[test]
    fn test_unrecognised_input_is_returned_unchanged() {
        let input = "jwplayer('player').setup({file:'https://cdn.example.com/v.mp4'});";
        assert!(matches!(deobfuscate(input), Cow::Borrowed(text) if text == input));

        let broken = "eval(function(p,a,c,k,e,d){return p}(broken))";
        assert_eq!(deobfuscate(broken), broken);
    }
}
