use clap::Parser;
use estim_lib::constants::{BUTTON_FRAME_HEAD, MAIN_HEADS};
use estim_lib::framing::FrameBuffer;
use estim_lib::message::{ButtonPacket, Packet, Record};
use estim_lib::packet::{checksum, frame_size};
use std::error::Error;

#[derive(Parser, Debug)]
#[command(author, version, about = "Decode hex-encoded stimulator frames and check their integrity")]
struct Args {
    /// Hex-encoded bytes, e.g. "cc5064000080". Spaces and colons are ignored.
    #[arg(required = true)]
    frames: Vec<String>,

    /// Treat the input as a raw stream and extract every frame found in it
    #[arg(short, long)]
    stream: bool,
}

fn print_packet(packet: &Packet) {
    match packet {
        Packet::Control(p) => {
            println!("  🎛️  Control {}", p.command);
            println!("     {}", p.param);
            println!("     dead cycle {} us", p.dead_cycle_us);
        }
        Packet::Pid(p) => println!("  🧮 PID {}", p.gains),
        Packet::Waveform(p) => {
            println!("  〰️  Waveform, {} samples", p.samples.len());
            for row in p.samples.chunks(10) {
                let line: Vec<String> = row.iter().map(|s| format!("{:>7.3}", s)).collect();
                println!("     {}", line.join(" "));
            }
        }
        Packet::Status(p) => println!("  📊 Status {}", p),
    }
}

fn decode_one(bytes: &[u8]) {
    let Some(&head) = bytes.first() else {
        println!("  ❌ empty input");
        return;
    };

    if head == BUTTON_FRAME_HEAD {
        match ButtonPacket::decode(bytes) {
            Ok(button) => println!("  🔘 Button {}", button.command),
            Err(e) => println!("  ❌ {}", e),
        }
        return;
    }

    match frame_size(head) {
        Some(size) if size == bytes.len() => {
            let computed = checksum(&bytes[..size - 1]);
            let stored = bytes[size - 1];
            let mark = if computed == stored { "✅" } else { "❌" };
            println!(
                "  {} checksum stored {:#04x}, computed {:#04x}",
                mark, stored, computed
            );
        }
        Some(size) => println!("  ⚠️  expected {} bytes for head {:#04x}", size, head),
        None => {}
    }

    match Packet::decode(bytes) {
        Ok(packet) => print_packet(&packet),
        Err(e) => println!("  ❌ {}", e),
    }
}

fn decode_stream(bytes: &[u8]) {
    let mut frames = FrameBuffer::with_limit(bytes.len().max(1));
    frames.extend(bytes);
    let mut found = 0;
    while let Some(packet) = frames.next_packet(&MAIN_HEADS) {
        found += 1;
        print_packet(&packet);
    }
    println!(
        "  {} frame(s), {} byte(s) skipped, {} byte(s) left over",
        found,
        frames.discarded(),
        frames.len()
    );
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    for input in &args.frames {
        let cleaned: String = input
            .chars()
            .filter(|c| !c.is_whitespace() && *c != ':')
            .collect();
        let bytes = hex::decode(&cleaned)?;
        println!("{} ({} bytes)", cleaned, bytes.len());

        if args.stream {
            decode_stream(&bytes);
        } else {
            decode_one(&bytes);
        }
    }

    Ok(())
}
