use std::io::BufRead;

use anyhow::anyhow;
use prost::Message as ProstMessage;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::config::Protocol;
use crate::transport::Frame;

/// Splits one transport payload into protocol frames: newline-delimited
/// JSON objects or length-delimited Protobuf messages.
pub(crate) fn decode_frames<T: DeserializeOwned + ProstMessage + Default>(
    data: &[u8],
    protocol: Protocol,
    handle_frame: impl FnMut(anyhow::Result<T>) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    match protocol {
        Protocol::Json => decode_frames_json(data, handle_frame),
        Protocol::Protobuf => decode_frames_protobuf(data, handle_frame),
    }
}

fn decode_frames_json<T: DeserializeOwned>(
    data: &[u8],
    mut handle_frame: impl FnMut(anyhow::Result<T>) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    for line in data.lines() {
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                log::debug!("failed to read line: {}", err);
                handle_frame(Err(anyhow!(err)))?;
                continue;
            }
        };

        if line.trim().is_empty() {
            continue;
        }

        log::trace!("<-- {}", line);

        handle_frame(match serde_json::from_str(&line) {
            Ok(frame) => Ok(frame),
            Err(err) => {
                log::debug!("failed to parse frame: {}", err);
                Err(anyhow!(err))
            }
        })?;
    }

    Ok(())
}

fn decode_frames_protobuf<T: ProstMessage + Default>(
    mut data: &[u8],
    mut handle_frame: impl FnMut(anyhow::Result<T>) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    while !data.is_empty() {
        let Ok(len) = prost::decode_length_delimiter(data) else {
            handle_frame(Err(anyhow!("invalid length delimiter")))?;
            break;
        };
        let len_delimiter_len = prost::length_delimiter_len(len);
        if len_delimiter_len + len > data.len() {
            // length comes from the peer
            log::trace!("<-- {} (??)", format_protobuf(data));
            handle_frame(Err(anyhow!("truncated frame")))?;
            break;
        }

        log::trace!("<-- {}", format_protobuf(&data[..len_delimiter_len + len]));
        data = &data[len_delimiter_len..];

        let result = T::decode(&data[..len]).map_err(|err| anyhow!(err));

        data = &data[len..];
        handle_frame(result)?;
    }

    Ok(())
}

/// Packs commands into a single transport frame. Returns `None` when nothing
/// could be encoded.
pub(crate) fn encode_frames<T: Serialize + ProstMessage>(
    commands: &[T],
    protocol: Protocol,
    mut on_encode_error: impl FnMut(usize),
) -> Option<Frame> {
    match protocol {
        Protocol::Json => {
            let mut lines = Vec::with_capacity(commands.len());
            for (idx, command) in commands.iter().enumerate() {
                match serde_json::to_string(command) {
                    Ok(line) => {
                        log::trace!("--> {}", &line);
                        lines.push(line);
                    }
                    Err(err) => {
                        on_encode_error(idx);
                        log::debug!("failed to encode command: {:?}", err);
                    }
                }
            }

            if lines.is_empty() {
                None
            } else {
                Some(Frame::Text(lines.join("\n")))
            }
        }
        Protocol::Protobuf => {
            let mut buf = Vec::new();
            for (idx, command) in commands.iter().enumerate() {
                let buf_len = buf.len();
                match command.encode_length_delimited(&mut buf) {
                    Ok(()) => log::trace!("--> {}", format_protobuf(&buf[buf_len..])),
                    Err(err) => {
                        buf.truncate(buf_len);
                        on_encode_error(idx);
                        log::debug!("failed to encode command: {:?}", err);
                    }
                }
            }

            if buf.is_empty() {
                None
            } else {
                Some(Frame::Binary(buf))
            }
        }
    }
}

fn format_protobuf(buf: &[u8]) -> String {
    fn buf_to_hex(buf: &[u8]) -> String {
        buf.iter().map(|b| format!("{:02x}", b)).collect::<Vec<_>>().join("")
    }

    let Ok(len) = prost::decode_length_delimiter(buf) else {
        return buf_to_hex(buf);
    };
    let len_delimiter_len = prost::length_delimiter_len(len);

    let (len, body) = buf.split_at_checked(len_delimiter_len).unwrap_or((buf, &[]));
    format!("{} {}", buf_to_hex(len), buf_to_hex(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{RawCommand, RawReply, SubscribeRequest};

    fn collect<T: DeserializeOwned + ProstMessage + Default>(
        data: &[u8],
        protocol: Protocol,
    ) -> Vec<anyhow::Result<T>> {
        let mut frames = Vec::new();
        decode_frames(data, protocol, |frame| {
            frames.push(frame);
            Ok(())
        })
        .unwrap();
        frames
    }

    fn subscribe(id: u32, channel: &str) -> RawCommand {
        RawCommand {
            id,
            subscribe: Some(SubscribeRequest {
                channel: channel.into(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn json_batch_is_newline_delimited() {
        let commands = [subscribe(1, "a"), subscribe(2, "b")];
        let Some(Frame::Text(text)) = encode_frames(&commands, Protocol::Json, |_| {}) else {
            panic!("expected text frame");
        };
        assert_eq!(text.lines().count(), 2);

        let decoded = collect::<RawCommand>(text.as_bytes(), Protocol::Json);
        let ids: Vec<u32> = decoded.into_iter().map(|f| f.unwrap().id).collect();
        assert_eq!(ids, [1, 2]);
    }

    #[test]
    fn json_bad_line_does_not_stop_batch() {
        let data = b"{\"id\":1}\nnot json\n{\"id\":2}\n";
        let decoded = collect::<RawReply>(data, Protocol::Json);
        assert_eq!(decoded.len(), 3);
        assert!(decoded[1].is_err());
        assert_eq!(decoded[2].as_ref().unwrap().id, 2);
    }

    #[test]
    fn protobuf_batch_is_length_delimited() {
        let commands = [subscribe(1, "a"), subscribe(2, "b")];
        let Some(Frame::Binary(buf)) = encode_frames(&commands, Protocol::Protobuf, |_| {}) else {
            panic!("expected binary frame");
        };

        let decoded = collect::<RawCommand>(&buf, Protocol::Protobuf);
        let channels: Vec<String> = decoded
            .into_iter()
            .map(|f| f.unwrap().subscribe.unwrap().channel)
            .collect();
        assert_eq!(channels, ["a", "b"]);
    }

    #[test]
    fn protobuf_truncated_frame_is_reported() {
        let Some(Frame::Binary(mut buf)) =
            encode_frames(&[subscribe(1, "abc")], Protocol::Protobuf, |_| {})
        else {
            panic!("expected binary frame");
        };
        buf.pop();

        let decoded = collect::<RawCommand>(&buf, Protocol::Protobuf);
        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].is_err());
    }

    #[test]
    fn nothing_to_encode() {
        assert!(encode_frames::<RawCommand>(&[], Protocol::Json, |_| {}).is_none());
        assert!(encode_frames::<RawCommand>(&[], Protocol::Protobuf, |_| {}).is_none());
    }
}
