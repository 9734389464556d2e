//! Entradas de audio para el transcodificador.
//!
//! Todo pasa por [`StreamAdapter`], que lee en bloques de 4 KiB y nunca pide
//! seek a la fuente: el decodificador funciona igual sobre un archivo, un
//! buffer en memoria, una respuesta HTTP o el stdout de un proceso.

use std::fs::File;
use std::future::Future;
use std::io::{self, Cursor, Read, Seek, SeekFrom};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use parking_lot::Mutex;
use tokio::process::{Child, ChildStdout};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

/// Tamaño máximo de cada lectura hacia la fuente.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Silencio máximo tolerado en una fuente remota antes de darla por caída.
pub const STREAM_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Flujo de bytes de entrada. `rewind` solo se usa para repetir en bucle.
pub trait MediaInput: Read + Send {
    fn can_rewind(&self) -> bool {
        false
    }

    fn rewind(&mut self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "la entrada no se puede rebobinar",
        ))
    }

    /// Las entradas que esperan a la red cortan sus lecturas con `cancel`.
    fn bind_cancel(&mut self, _cancel: CancellationToken) {}
}

impl MediaInput for Cursor<Bytes> {
    fn can_rewind(&self) -> bool {
        true
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.set_position(0);
        Ok(())
    }
}

impl MediaInput for Cursor<Vec<u8>> {
    fn can_rewind(&self) -> bool {
        true
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.set_position(0);
        Ok(())
    }
}

impl MediaInput for File {
    fn can_rewind(&self) -> bool {
        true
    }

    fn rewind(&mut self) -> io::Result<()> {
        self.seek(SeekFrom::Start(0)).map(|_| ())
    }
}

fn cancelled_read() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionAborted, "lectura cancelada")
}

/// Espera `fut` desde un hilo bloqueante. Corta si se cancela o si la
/// fuente no entrega nada en `timeout`.
fn block_on_io<T>(
    runtime: &Handle,
    cancel: &CancellationToken,
    timeout: Duration,
    fut: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    if cancel.is_cancelled() {
        return Err(cancelled_read());
    }
    runtime.block_on(async {
        tokio::select! {
            _ = cancel.cancelled() => Err(cancelled_read()),
            result = tokio::time::timeout(timeout, fut) => result.unwrap_or_else(|_| {
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("la fuente no envió datos en {:?}", timeout),
                ))
            }),
        }
    })
}

type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Cuerpo de una respuesta HTTP leído de forma síncrona.
///
/// Debe crearse dentro del runtime de tokio y leerse desde un hilo
/// bloqueante (`spawn_blocking`).
pub struct HttpInput {
    body: ByteStream,
    pending: Bytes,
    runtime: Handle,
    cancel: CancellationToken,
    read_timeout: Duration,
}

impl HttpInput {
    pub fn new(response: reqwest::Response) -> Self {
        Self {
            body: response.bytes_stream().map_err(io::Error::other).boxed(),
            pending: Bytes::new(),
            runtime: Handle::current(),
            cancel: CancellationToken::new(),
            read_timeout: STREAM_READ_TIMEOUT,
        }
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

impl Read for HttpInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pending.is_empty() {
            let body = &mut self.body;
            let next = block_on_io(&self.runtime, &self.cancel, self.read_timeout, async {
                body.next().await.transpose()
            })?;
            match next {
                Some(chunk) => self.pending = chunk,
                None => return Ok(0),
            }
        }

        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        Ok(n)
    }
}

impl MediaInput for HttpInput {
    fn bind_cancel(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }
}

/// stdout de un proceso externo (yt-dlp). El proceso muere con la entrada.
pub struct ProcessInput {
    stdout: ChildStdout,
    _child: Child,
    runtime: Handle,
    cancel: CancellationToken,
    read_timeout: Duration,
}

impl ProcessInput {
    /// `child` debe haberse lanzado con `kill_on_drop(true)` y stdout en pipe.
    pub fn new(mut child: Child) -> io::Result<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "el proceso no tiene stdout"))?;
        Ok(Self {
            stdout,
            _child: child,
            runtime: Handle::current(),
            cancel: CancellationToken::new(),
            read_timeout: STREAM_READ_TIMEOUT,
        })
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }
}

impl Read for ProcessInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let stdout = &mut self.stdout;
        block_on_io(
            &self.runtime,
            &self.cancel,
            self.read_timeout,
            tokio::io::AsyncReadExt::read(stdout, buf),
        )
    }
}

impl MediaInput for ProcessInput {
    fn bind_cancel(&mut self, cancel: CancellationToken) {
        self.cancel = cancel;
    }
}

/// Entrada compartida entre el adaptador y el bucle de repetición.
pub type SharedInput = Arc<Mutex<Box<dyn MediaInput>>>;

/// Adaptador de lectura por bloques sobre la entrada compartida.
pub struct StreamAdapter {
    input: SharedInput,
}

impl StreamAdapter {
    pub fn new(input: SharedInput) -> Self {
        Self { input }
    }
}

impl Read for StreamAdapter {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let len = buf.len().min(READ_CHUNK_SIZE);
        self.input.lock().read(&mut buf[..len])
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::process::Stdio;
    use std::time::Instant;

    /// Servidor HTTP local que envía cabeceras y `body`, y luego se queda mudo.
    pub(crate) async fn stalled_server(body: Vec<u8>) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let mut request = [0u8; 2048];
            let _ = socket.read(&mut request).await;
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: audio/wav\r\nContent-Length: {}\r\n\r\n",
                body.len() + 1_000_000
            );
            let _ = socket.write_all(head.as_bytes()).await;
            let _ = socket.write_all(&body).await;
            let _ = socket.flush().await;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            drop(socket);
        });
        format!("http://{}/stream.wav", addr)
    }

    struct CountingInput {
        data: Vec<u8>,
        pos: usize,
        largest_read: Arc<Mutex<usize>>,
    }

    impl Read for CountingInput {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let mut largest = self.largest_read.lock();
            *largest = (*largest).max(buf.len());
            let n = buf.len().min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    impl MediaInput for CountingInput {}

    #[test]
    fn test_adapter_reads_in_small_chunks() {
        let largest = Arc::new(Mutex::new(0));
        let input: Box<dyn MediaInput> = Box::new(CountingInput {
            data: vec![7u8; 20_000],
            pos: 0,
            largest_read: largest.clone(),
        });
        let mut adapter = StreamAdapter::new(Arc::new(Mutex::new(input)));

        let mut out = Vec::new();
        adapter.read_to_end(&mut out).unwrap();

        assert_eq!(out.len(), 20_000);
        assert!(*largest.lock() <= READ_CHUNK_SIZE);
    }

    #[test]
    fn test_memory_input_rewinds() {
        let mut input = Cursor::new(Bytes::from_static(b"abc"));
        let mut first = String::new();
        input.read_to_string(&mut first).unwrap();
        assert!(input.can_rewind());
        MediaInput::rewind(&mut input).unwrap();
        let mut second = String::new();
        input.read_to_string(&mut second).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_file_input_rewinds() {
        use std::io::Write;
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(b"hola").unwrap();
        MediaInput::rewind(&mut file).unwrap();
        let mut text = String::new();
        file.read_to_string(&mut text).unwrap();
        assert_eq!(text, "hola");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_http_input_times_out_when_source_stalls() {
        let url = stalled_server(b"hola".to_vec()).await;
        let response = reqwest::get(&url).await.unwrap();
        let mut input = HttpInput::new(response).with_read_timeout(Duration::from_millis(200));

        let started = Instant::now();
        let (bytes, err) = tokio::task::spawn_blocking(move || {
            let mut bytes = Vec::new();
            let err = input.read_to_end(&mut bytes).unwrap_err();
            (bytes, err)
        })
        .await
        .unwrap();

        assert_eq!(bytes, b"hola");
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_http_input_read_stops_on_cancel() {
        let url = stalled_server(b"hola".to_vec()).await;
        let response = reqwest::get(&url).await.unwrap();
        let mut input = HttpInput::new(response);
        let cancel = CancellationToken::new();
        input.bind_cancel(cancel.clone());

        let reader = tokio::task::spawn_blocking(move || {
            let mut bytes = Vec::new();
            let err = input.read_to_end(&mut bytes).unwrap_err();
            (bytes, err)
        });
        tokio::time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();

        let (bytes, err) = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .expect("la lectura ignoró la cancelación")
            .unwrap();
        assert_eq!(bytes, b"hola");
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_process_input_read_stops_on_cancel() {
        let child = tokio::process::Command::new("sh")
            .args(["-c", "printf abc; sleep 3600"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let mut input = ProcessInput::new(child).unwrap();
        let cancel = CancellationToken::new();
        input.bind_cancel(cancel.clone());

        let reader = tokio::task::spawn_blocking(move || {
            let mut bytes = Vec::new();
            let err = input.read_to_end(&mut bytes).unwrap_err();
            (bytes, err)
        });
        tokio::time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();

        let (bytes, err) = tokio::time::timeout(Duration::from_secs(2), reader)
            .await
            .expect("la lectura ignoró la cancelación")
            .unwrap();
        assert_eq!(bytes, b"abc");
        assert_eq!(err.kind(), io::ErrorKind::ConnectionAborted);
    }
}
