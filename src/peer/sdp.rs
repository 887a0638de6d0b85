//! Rewriting of the local SDP offers.

/// Options of an SDP offer rewrite.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Munging {
    /// Enables discontinuous transmission of the Opus audio.
    pub dtx: bool,

    /// Moves redundant audio coding to the front of the audio payloads.
    pub red: bool,
}

impl Munging {
    /// Rewrites the provided SDP according to these [`Munging`] options.
    #[must_use]
    pub fn apply(self, sdp: &str) -> String {
        let mut sdp = sdp.to_owned();
        if self.dtx {
            sdp = enable_dtx(&sdp);
        }
        if self.red {
            sdp = prefer_red(&sdp);
        }
        sdp
    }
}

/// Enables DTX on every Opus payload using in-band FEC.
#[must_use]
pub fn enable_dtx(sdp: &str) -> String {
    if sdp.contains("usedtx=1") {
        return sdp.to_owned();
    }
    sdp.replace("useinbandfec=1", "useinbandfec=1;usedtx=1")
}

/// Moves the `red/48000/2` payload to the front of the audio m-line.
///
/// Returns the provided SDP as is if it has no such payload.
#[must_use]
pub fn prefer_red(sdp: &str) -> String {
    let red = sdp.lines().find_map(|line| {
        let (pt, codec) = line.strip_prefix("a=rtpmap:")?.split_once(' ')?;
        if codec.trim().eq_ignore_ascii_case("red/48000/2") {
            Some(pt.to_owned())
        } else {
            None
        }
    });
    let red = match red {
        Some(pt) => pt,
        None => return sdp.to_owned(),
    };

    let sep = if sdp.contains("\r\n") { "\r\n" } else { "\n" };
    sdp.split(sep)
        .map(|line| {
            if !line.starts_with("m=audio ") {
                return line.to_owned();
            }
            let mut parts: Vec<&str> = line.split(' ').collect();
            if parts.len() <= 3 {
                return line.to_owned();
            }
            let mut payloads = parts.split_off(3);
            if let Some(i) = payloads.iter().position(|pt| *pt == red) {
                let pt = payloads.remove(i);
                payloads.insert(0, pt);
            }
            parts.extend(payloads);
            parts.join(" ")
        })
        .collect::<Vec<_>>()
        .join(sep)
}

#[cfg(test)]
mod spec {
    use super::{enable_dtx, prefer_red, Munging};

    const OFFER: &str = "v=0\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111 63 103\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        a=fmtp:111 minptime=10;useinbandfec=1\r\n\
        a=rtpmap:63 red/48000/2\r\n\
        a=rtpmap:103 ISAC/16000\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n";

    #[test]
    fn enables_dtx_once() {
        let sdp = enable_dtx(OFFER);
        assert!(sdp.contains("a=fmtp:111 minptime=10;useinbandfec=1;usedtx=1"));
        assert_eq!(enable_dtx(&sdp), sdp);
    }

    #[test]
    fn moves_red_to_front_of_audio_line() {
        let sdp = prefer_red(OFFER);
        assert!(sdp.contains("m=audio 9 UDP/TLS/RTP/SAVPF 63 111 103\r\n"));
        assert!(sdp.contains("m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n"));
    }

    #[test]
    fn leaves_sdp_without_red_untouched() {
        let sdp = "v=0\nm=audio 9 UDP/TLS/RTP/SAVPF 111\n";
        assert_eq!(prefer_red(sdp), sdp);
    }

    #[test]
    fn disabled_munging_is_noop() {
        assert_eq!(Munging::default().apply(OFFER), OFFER);
    }
}
