//! C-style `format()` string interpolation.
//!
//! Supports `%[parameter$][flags][width][.precision][length]type` with the
//! `d i o x X u c s f e E g G p n %` conversions. Missing arguments render
//! as zero (numeric) or empty (text) instead of failing, and the scan
//! resumes after each substituted value so argument text containing `%`
//! never re-triggers a conversion.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::val::Val;

static SPEC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"%(\d*\$)?(['#\-\+ ]*)(\d*)(?:\.(\d+))?([hl])?([dioxXucsfeEgGpn%])")
        .unwrap()
});

struct Spec {
    alternate: bool,
    left: bool,
    plus: bool,
    space: bool,
    group: bool,
    zero_pad: bool,
    width: Option<usize>,
    precision: Option<usize>,
    conv: char,
}

pub fn format(fmt: &str, args: &[Val]) -> String {
    let mut out = fmt.to_string();
    let mut from = 0;
    let mut next_arg = 0;

    while let Some(caps) = SPEC_RE.captures(&out[from..]) {
        let whole = match caps.get(0) {
            Some(m) => m,
            None => break,
        };
        let start = from + whole.start();
        let end = from + whole.end();

        let mut arg_ix = next_arg;
        if let Some(param) = caps.get(1) {
            if let Ok(n) = param.as_str().trim_end_matches('$').parse::<usize>() {
                arg_ix = n.saturating_sub(1);
            }
        }

        let flags = caps.get(2).map(|m| m.as_str()).unwrap_or("");
        let width_text = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        let mut spec = Spec {
            alternate: flags.contains('#'),
            left: flags.contains('-'),
            plus: flags.contains('+'),
            space: flags.contains(' ') && !flags.contains('+'),
            group: flags.contains('\''),
            zero_pad: width_text.starts_with('0'),
            width: width_text.parse().ok(),
            precision: caps.get(4).and_then(|m| m.as_str().parse().ok()),
            conv: caps
                .get(6)
                .and_then(|m| m.as_str().chars().next())
                .unwrap_or('%'),
        };
        // Left alignment wins over zero padding.
        if spec.left {
            spec.zero_pad = false;
        }

        let arg = args.get(arg_ix);
        let replacement = match spec.conv {
            '%' => "%".to_string(),
            // `%n` has no output and consumes no argument.
            'n' => String::new(),
            _ => {
                next_arg += 1;
                render(arg, &spec)
            }
        };

        out.replace_range(start..end, &replacement);
        from = start + replacement.len();
    }

    out
}

fn render(arg: Option<&Val>, spec: &Spec) -> String {
    let num = arg.map(Val::as_num).unwrap_or(0.0);
    match spec.conv {
        'd' | 'i' => render_int(num.trunc() as i64, spec),
        'u' => render_int(num.trunc() as i64 as u64 as i64, spec),
        'o' => {
            let digits = format!("{:o}", num.trunc() as i64 as u64);
            let digits = if spec.alternate && digits != "0" {
                format!("0{digits}")
            } else {
                digits
            };
            pad(digits, spec)
        }
        'x' | 'X' => {
            let raw = num.trunc() as i64 as u64;
            let mut digits = if spec.conv == 'x' {
                format!("{raw:x}")
            } else {
                format!("{raw:X}")
            };
            if let Some(p) = spec.precision {
                while digits.len() < p {
                    digits.insert(0, '0');
                }
            }
            if spec.alternate {
                digits = if spec.conv == 'x' {
                    format!("0x{digits}")
                } else {
                    format!("0X{digits}")
                };
            }
            pad(digits, spec)
        }
        'c' => {
            let text = match arg {
                Some(Val::Str(s)) => s.as_str_lossy().chars().next().map(String::from),
                Some(v) => char::from_u32(v.as_num() as u32).map(String::from),
                None => None,
            };
            pad(text.unwrap_or_default(), spec)
        }
        's' => {
            let mut text = arg.map(|v| v.to_string()).unwrap_or_default();
            if let Some(p) = spec.precision {
                if text.len() > p {
                    text.truncate(p);
                }
            }
            pad(text, spec)
        }
        'f' => render_float(num, spec.precision.unwrap_or(6), spec),
        'e' | 'E' => {
            let body = render_exp(num, spec.precision.unwrap_or(6), spec.conv == 'E');
            with_sign_and_pad(num >= 0.0, body, spec)
        }
        'g' | 'G' => {
            let body = render_general(num, spec.precision.unwrap_or(6).max(1), spec.conv == 'G');
            with_sign_and_pad(num >= 0.0, body, spec)
        }
        // Script values are never raw pointers.
        'p' => String::new(),
        _ => String::new(),
    }
}

fn render_int(value: i64, spec: &Spec) -> String {
    let body = if spec.group {
        group_thousands(value.unsigned_abs())
    } else {
        value.unsigned_abs().to_string()
    };
    let body = if value < 0 {
        format!("-{body}")
    } else {
        body
    };
    with_sign_and_pad(value >= 0, body, spec)
}

fn render_float(value: f64, precision: usize, spec: &Spec) -> String {
    let body = if spec.group {
        let formatted = format!("{:.*}", precision, value.abs());
        let (int_part, frac) = match formatted.split_once('.') {
            Some((i, f)) => (i.to_string(), Some(f.to_string())),
            None => (formatted, None),
        };
        let grouped = group_thousands(int_part.parse().unwrap_or(0));
        let joined = match frac {
            Some(f) => format!("{grouped}.{f}"),
            None => grouped,
        };
        if value.is_sign_negative() {
            format!("-{joined}")
        } else {
            joined
        }
    } else {
        format!("{value:.precision$}")
    };
    with_sign_and_pad(!body.starts_with('-'), body, spec)
}

fn render_exp(value: f64, precision: usize, upper: bool) -> String {
    if value == 0.0 {
        let mantissa = format!("{:.*}", precision, 0.0);
        let e = if upper { 'E' } else { 'e' };
        return format!("{mantissa}{e}+00");
    }
    let exp = value.abs().log10().floor() as i32;
    let mantissa = value / 10f64.powi(exp);
    let e = if upper { 'E' } else { 'e' };
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{:.*}{}{}{:02}", precision, mantissa, e, sign, exp.abs())
}

fn render_general(value: f64, precision: usize, upper: bool) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let exp = value.abs().log10().floor() as i32;
    let body = if exp < -4 || exp >= precision as i32 {
        render_exp(value, precision.saturating_sub(1), upper)
    } else {
        let decimals = (precision as i32 - 1 - exp).max(0) as usize;
        format!("{value:.decimals$}")
    };
    // General format drops trailing fractional zeroes.
    if body.contains('.') && !body.contains('e') && !body.contains('E') {
        body.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        body
    }
}

/// Applies the `+`/space sign flags and the width padding. Zero padding goes
/// between the sign and the digits so `-3.1` widens to `-03.1`, not `0-3.1`.
fn with_sign_and_pad(non_negative: bool, body: String, spec: &Spec) -> String {
    let body = if non_negative && spec.plus {
        format!("+{body}")
    } else if non_negative && spec.space {
        format!(" {body}")
    } else {
        body
    };

    if spec.zero_pad {
        let Some(width) = spec.width else { return body };
        if body.len() >= width {
            return body;
        }
        let (sign, digits) = match body.strip_prefix(['-', '+', ' ']) {
            Some(rest) => (&body[..1], rest),
            None => ("", body.as_str()),
        };
        let zeros = "0".repeat(width - body.len());
        format!("{sign}{zeros}{digits}")
    } else {
        pad(body, spec)
    }
}

fn pad(body: String, spec: &Spec) -> String {
    let Some(width) = spec.width else { return body };
    if body.len() >= width {
        return body;
    }
    let fill = " ".repeat(width - body.len());
    if spec.left {
        format!("{body}{fill}")
    } else {
        format!("{fill}{body}")
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
