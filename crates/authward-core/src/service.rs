use std::fmt;
use std::str::FromStr;

/// A service whose authentication log lines we recognize.
///
/// The numeric codes are stable: they are persisted in blacklist records and
/// exported to command back-ends as `SSHG_SERVICE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// The attacked service is not relevant; block for everything.
    Any,
    Ssh,
    UwImap,
    Dovecot,
    CyrusImap,
    Cucipop,
    Exim,
    Sendmail,
    FreeBsdFtpd,
    ProFtpd,
    PureFtpd,
    VsFtpd,
}

impl Service {
    pub fn code(self) -> u32 {
        match self {
            Service::Any => 0,
            Service::Ssh => 100,
            Service::UwImap => 200,
            Service::Dovecot => 210,
            Service::CyrusImap => 220,
            Service::Cucipop => 230,
            Service::Exim => 240,
            Service::Sendmail => 250,
            Service::FreeBsdFtpd => 300,
            Service::ProFtpd => 310,
            Service::PureFtpd => 320,
            Service::VsFtpd => 330,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            0 => Service::Any,
            100 => Service::Ssh,
            200 => Service::UwImap,
            210 => Service::Dovecot,
            220 => Service::CyrusImap,
            230 => Service::Cucipop,
            240 => Service::Exim,
            250 => Service::Sendmail,
            300 => Service::FreeBsdFtpd,
            310 => Service::ProFtpd,
            320 => Service::PureFtpd,
            330 => Service::VsFtpd,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            Service::Any => "any",
            Service::Ssh => "ssh",
            Service::UwImap => "uw-imap",
            Service::Dovecot => "dovecot",
            Service::CyrusImap => "cyrus-imap",
            Service::Cucipop => "cucipop",
            Service::Exim => "exim",
            Service::Sendmail => "sendmail",
            Service::FreeBsdFtpd => "freebsd-ftpd",
            Service::ProFtpd => "proftpd",
            Service::PureFtpd => "pure-ftpd",
            Service::VsFtpd => "vsftpd",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts either a service name (`ssh`) or its numeric code (`100`), as
/// used by the `-f` pidfile-binding option.
impl FromStr for Service {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Ok(code) = s.parse::<u32>() {
            return Service::from_code(code).ok_or_else(|| format!("unknown service code {code}"));
        }
        let lowered = s.to_ascii_lowercase();
        for svc in ALL_SERVICES {
            if svc.name() == lowered {
                return Ok(svc);
            }
        }
        Err(format!("unknown service '{s}'"))
    }
}

const ALL_SERVICES: [Service; 12] = [
    Service::Any,
    Service::Ssh,
    Service::UwImap,
    Service::Dovecot,
    Service::CyrusImap,
    Service::Cucipop,
    Service::Exim,
    Service::Sendmail,
    Service::FreeBsdFtpd,
    Service::ProFtpd,
    Service::PureFtpd,
    Service::VsFtpd,
];
