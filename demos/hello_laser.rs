use coboltctrl::proto::command::{cmd, encode};
use coboltctrl::proto::resolver::list_ports;
use coboltctrl::proto::transport;
use coboltctrl::{DEFAULT_BAUDRATE, DEFAULT_TIMEOUT};
use std::io::BufRead;

#[tokio::main]
async fn main() -> coboltctrl::Result<()> {
    let ports = list_ports()?;
    for (i, port) in ports.iter().enumerate() {
        println!("{} : {}", i, port);
    }

    println!("Please select serial port!");
    let mut choice = String::new();
    std::io::stdin().lock().read_line(&mut choice)?;
    let port = match choice.trim().parse::<usize>().ok().and_then(|i| ports.get(i)) {
        Some(port) => port,
        None => {
            eprintln!("Port ID out of range");
            return Ok(());
        }
    };

    let mut conn = transport::open(&port.port_name, DEFAULT_BAUDRATE, DEFAULT_TIMEOUT)?;
    println!("Is the serial port open? {}", if conn.is_open() { "Yes." } else { "No." });

    // Terminator is added by the connection.
    conn.write_line(&encode(&cmd::SERIAL_NUMBER, &[])?).await?;
    println!("Serial number was: {}", conn.read_line().await?);

    conn.close();
    Ok(())
}
