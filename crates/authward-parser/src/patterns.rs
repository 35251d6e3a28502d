//! The closed set of recognized log phrases.
//!
//! Each pattern matches one phrase family after the banner has been
//! stripped: a per-service prefix literal, an address token, and optionally
//! a suffix literal. The address token is one of three named groups (`ip4`,
//! `ip6`, `host`); exactly one is present in any match.

use std::sync::OnceLock;

use regex::Regex;

use authward_core::attack::DEFAULT_DANGER;
use authward_core::Service;

/// A recognized attack phrase family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackKind {
    SshInvalidUser,
    SshUserNotAllowed,
    SshLoginError,
    SshReverseMap,
    SshNoIdentString,
    SshBadProtocol,
    DovecotLoginError,
    UwImapLoginError,
    CyrusSaslLoginError,
    CucipopAuthFail,
    EximAuthFail,
    SendmailRelayDenied,
    FreeBsdFtpdLoginError,
    ProFtpdLoginError,
    PureFtpdLoginError,
    VsFtpdLoginError,
}

impl AttackKind {
    pub fn service(self) -> Service {
        match self {
            AttackKind::SshInvalidUser
            | AttackKind::SshUserNotAllowed
            | AttackKind::SshLoginError
            | AttackKind::SshReverseMap
            | AttackKind::SshNoIdentString
            | AttackKind::SshBadProtocol => Service::Ssh,
            AttackKind::DovecotLoginError => Service::Dovecot,
            AttackKind::UwImapLoginError => Service::UwImap,
            AttackKind::CyrusSaslLoginError => Service::CyrusImap,
            AttackKind::CucipopAuthFail => Service::Cucipop,
            AttackKind::EximAuthFail => Service::Exim,
            AttackKind::SendmailRelayDenied => Service::Sendmail,
            AttackKind::FreeBsdFtpdLoginError => Service::FreeBsdFtpd,
            AttackKind::ProFtpdLoginError => Service::ProFtpd,
            AttackKind::PureFtpdLoginError => Service::PureFtpd,
            AttackKind::VsFtpdLoginError => Service::VsFtpd,
        }
    }

    /// Danger weight contributed by one attack of this kind. Kinds may
    /// override the default; none currently does.
    pub fn danger(self) -> u32 {
        DEFAULT_DANGER
    }
}

/// The address token as it appeared in the log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddrToken {
    Ip4(String),
    Ip6(String),
    Host(String),
}

// Address classes. The v6 class is permissive; the literal is validated by
// the real parser afterwards, so a malformed colon-soup token just drops
// the line.
const IP4: &str = r"(?:25[0-5]|2[0-4][0-9]|1[0-9]{2}|[1-9][0-9]?|0)(?:\.(?:25[0-5]|2[0-4][0-9]|1[0-9]{2}|[1-9][0-9]?|0)){3}";
const IP6: &str = r"[0-9a-fA-F:]*:[0-9a-fA-F:]+(?:\.[0-9.]+)?";
const HOST: &str = r"localhost|(?:[-a-zA-Z0-9]+\.)+[a-zA-Z]+";

fn addr_group() -> String {
    format!("(?:(?P<ip4>{IP4})|(?P<ip6>{IP6})|(?P<host>{HOST}))")
}

struct PhrasePattern {
    kind: AttackKind,
    re: Regex,
}

static PATTERNS: OnceLock<Vec<PhrasePattern>> = OnceLock::new();

fn patterns() -> &'static [PhrasePattern] {
    PATTERNS.get_or_init(|| {
        let addr = addr_group();
        let make = |kind, tpl: &str| PhrasePattern {
            kind,
            re: Regex::new(&tpl.replace("{ADDR}", &addr)).expect("invalid phrase pattern"),
        };
        vec![
            make(
                AttackKind::SshInvalidUser,
                r"^(?:Invalid|Illegal) user .+ from {ADDR}\s*$",
            ),
            make(
                AttackKind::SshUserNotAllowed,
                r"^User \S+ from {ADDR} not allowed because .*$",
            ),
            make(
                AttackKind::SshLoginError,
                r"^Failed \S+ for (?:invalid user |illegal user )?.+ from {ADDR}(?: port \d+)?(?: ssh\d*)?\s*$",
            ),
            make(
                AttackKind::SshLoginError,
                r"^error: PAM: [Aa]uthentication (?:error|failure) for (?:illegal user )?.+ from {ADDR}\s*$",
            ),
            make(
                AttackKind::SshReverseMap,
                r"^reverse mapping checking getaddrinfo for \S+ \[{ADDR}\] failed - POSSIBLE BREAK-IN ATTEMPT!?\s*$",
            ),
            make(
                AttackKind::SshNoIdentString,
                r"^Did not receive identification string from {ADDR}\s*$",
            ),
            make(
                AttackKind::SshBadProtocol,
                r"^Bad protocol version identification '.*' from {ADDR}(?: port \d+)?\s*$",
            ),
            make(
                AttackKind::DovecotLoginError,
                r#"^(?:imap|pop3)-login: (?:Aborted login|Disconnected).*\((?:auth failed|Auth process broken)[^)]*\).*rip={ADDR}(?:[,\s].*)?$"#,
            ),
            make(
                AttackKind::UwImapLoginError,
                r"^Login failed user=\S+ (?:auth=\S+ )?host=\S*\s*\[{ADDR}\]\s*$",
            ),
            make(
                AttackKind::CyrusSaslLoginError,
                r"^badlogin: \S*\[{ADDR}\] \S+ (?:\S+ )?SASL\(-\d+\): authentication failure.*$",
            ),
            make(
                AttackKind::CucipopAuthFail,
                r"^authentication failure (?:for \S+ )?from {ADDR}\s*$",
            ),
            make(
                AttackKind::EximAuthFail,
                r"^\S+ authenticator failed for (?:\S+ )?\(\S*\) \[{ADDR}\](?::\d+)?: 535 Incorrect authentication data.*$",
            ),
            make(
                AttackKind::SendmailRelayDenied,
                r"^ruleset=check_rcpt, arg1=<[^>]*>, relay=\S*\s*\[{ADDR}\](?:\.\S*)?, reject=550 5\.7\.1 .*Relaying denied.*$",
            ),
            make(
                AttackKind::FreeBsdFtpdLoginError,
                r"^FTP LOGIN FAILED FROM {ADDR}(?:,.*)?$",
            ),
            make(
                AttackKind::ProFtpdLoginError,
                r"^\S+ \(\S+\[{ADDR}\]\) - USER \S+(?: \(Login failed\))?: (?:no such user found|Incorrect password).*$",
            ),
            make(
                AttackKind::PureFtpdLoginError,
                r"^\(\?@{ADDR}\) \[WARNING\] Authentication failed for user \[[^\]]*\]\s*$",
            ),
            make(
                AttackKind::VsFtpdLoginError,
                r#"^.*FAIL LOGIN: Client "{ADDR}"\s*$"#,
            ),
        ]
    })
}

/// Match one attack phrase against a banner-stripped line.
pub(crate) fn match_phrase(rest: &str) -> Option<(AttackKind, AddrToken)> {
    for pattern in patterns() {
        if let Some(caps) = pattern.re.captures(rest) {
            let token = if let Some(m) = caps.name("ip4") {
                AddrToken::Ip4(m.as_str().to_string())
            } else if let Some(m) = caps.name("ip6") {
                AddrToken::Ip6(m.as_str().to_string())
            } else if let Some(m) = caps.name("host") {
                AddrToken::Host(m.as_str().to_string())
            } else {
                continue;
            };
            return Some((pattern.kind, token));
        }
    }
    None
}

static REPEAT_RE: OnceLock<Regex> = OnceLock::new();

/// The standalone repetition sentinel emitted by syslogd.
pub(crate) fn match_repeat(rest: &str) -> Option<u64> {
    let re = REPEAT_RE.get_or_init(|| {
        Regex::new(r"^last message repeated (\d+) times\s*$").expect("invalid regex")
    });
    re.captures(rest)?.get(1)?.as_str().parse().ok()
}

static SYSLOG_BANNER_RE: OnceLock<Regex> = OnceLock::new();
static METALOG_BANNER_RE: OnceLock<Regex> = OnceLock::new();
static TAI64_RE: OnceLock<Regex> = OnceLock::new();
static PROG_RE: OnceLock<Regex> = OnceLock::new();

/// Strip the optional leading banner from a raw line, returning the phrase
/// part and the syslog PID when one was present.
pub(crate) fn strip_banner(line: &str) -> (&str, Option<u32>) {
    let mut rest = line.trim_end();

    // TAI64 label (e.g. from svlogd/multilog), optionally followed by the
    // usual `prog[pid]:` part.
    let tai64 = TAI64_RE
        .get_or_init(|| Regex::new(r"^@[0-9a-fA-F]{24}\s+").expect("invalid regex"));
    if let Some(m) = tai64.find(rest) {
        rest = &rest[m.end()..];
        let prog = PROG_RE.get_or_init(|| {
            Regex::new(r"^[^\s:\[\]]+(?:\[(?P<pid>\d+)\])?:\s+").expect("invalid regex")
        });
        if let Some(caps) = prog.captures(rest) {
            let pid = caps.name("pid").and_then(|m| m.as_str().parse().ok());
            return (&rest[caps.get(0).expect("whole match").end()..], pid);
        }
        return (rest, None);
    }

    // Classic syslog banner: `Mon  d HH:MM:SS host prog[pid]: `.
    let syslog = SYSLOG_BANNER_RE.get_or_init(|| {
        Regex::new(
            r"^[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}\s+\S+\s+[^\s:\[\]]+(?:\[(?P<pid>\d+)\])?:\s+",
        )
        .expect("invalid regex")
    });
    if let Some(caps) = syslog.captures(rest) {
        let pid = caps.name("pid").and_then(|m| m.as_str().parse().ok());
        return (&rest[caps.get(0).expect("whole match").end()..], pid);
    }

    // Metalog banner: `Mon  d HH:MM:SS [prog] `.
    let metalog = METALOG_BANNER_RE.get_or_init(|| {
        Regex::new(r"^[A-Z][a-z]{2}\s+\d{1,2}\s+\d{2}:\d{2}:\d{2}\s+\[[^\]]+\]\s+")
            .expect("invalid regex")
    });
    if let Some(m) = metalog.find(rest) {
        return (&rest[m.end()..], None);
    }

    (rest, None)
}
