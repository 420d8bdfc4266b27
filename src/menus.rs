use minijinja::{context, Environment};

use crate::types::{
    KycSearchResponse, PersonKind, SearchDraft, DEFAULT_MATCH_PERCENTAGE, MAX_MATCH_PERCENTAGE,
    MIN_MATCH_PERCENTAGE,
};

const WELCOME_TEMPLATE: &str = include_str!("menus/welcome.j2");

pub struct WelcomeContext<'a> {
    pub user_name: &'a str,
    pub company: &'a str,
    pub is_first_time: bool,
}

pub fn render_welcome(ctx: &WelcomeContext<'_>) -> String {
    let mut env = Environment::new();
    if env.add_template("welcome", WELCOME_TEMPLATE).is_err() {
        return fallback_welcome(ctx);
    }

    let Ok(template) = env.get_template("welcome") else {
        return fallback_welcome(ctx);
    };

    template
        .render(context! {
            user_name => ctx.user_name,
            company => ctx.company,
            is_first_time => ctx.is_first_time,
        })
        .unwrap_or_else(|_| fallback_welcome(ctx))
}

fn fallback_welcome(ctx: &WelcomeContext<'_>) -> String {
    format!(
        "¡Hola {}! 👋\n\n*Bienvenido al Sistema KYC-LISTAS*\n🏢 {}\n\n\
         Selecciona una opción:\n\
         *1* - 🔎 Búsqueda en listas\n\
         *2* - 📋 Búsquedas recientes\n\
         *3* - ℹ️ Ayuda y soporte\n\n\
         Tu número está autorizado para realizar consultas.",
        ctx.user_name, ctx.company
    )
}

pub fn invalid_welcome_option() -> String {
    "🤔 *No entiendo esa opción*\n\n\
     Para usar el sistema, selecciona una opción:\n\n\
     1️⃣ 🔎 *Buscar en Listas*\n\
     2️⃣ 📋 *Búsquedas Recientes*\n\
     3️⃣ ℹ️ *Ayuda y Soporte*\n\n\
     ━━━━━━━━━━━━━━━━━━\n\
     💡 *Comandos útiles:*\n\
     • Escribe *menu* para ver el menú\n\
     • Escribe *ayuda* para obtener ayuda\n\
     • Escribe *info* para ver las listas disponibles"
        .to_string()
}

pub fn search_type_menu(ocr_enabled: bool) -> String {
    let mut menu = String::from(
        "🔍 *Tipo de Búsqueda KYC*\n\
         ━━━━━━━━━━━━━━━━━━\n\n\
         Selecciona el tipo de búsqueda:\n\n\
         1️⃣ 👤 *Persona Física*\n      _Nombre y apellidos por separado_\n\n\
         2️⃣ 🏢 *Empresa / Razón Social*\n      _Búsqueda por nombre comercial_\n\n\
         3️⃣ 📝 *Persona Física (nombre completo)*\n      _Todo el nombre en una sola línea_\n\n\
         4️⃣ ⚙️ *Búsqueda Avanzada*\n      _Con parámetros específicos_\n",
    );
    if ocr_enabled {
        menu.push_str("\n5️⃣ 🪪 *Búsqueda por INE*\n      _Envía fotos de la credencial_\n");
    }
    menu.push_str("\n━━━━━━━━━━━━━━━━━━\n↩️ Escribe *menu* para volver al inicio");
    menu
}

pub fn invalid_person_type(ocr_enabled: bool) -> String {
    let extra = if ocr_enabled { "\n5️⃣ *Búsqueda por INE*" } else { "" };
    format!(
        "❌ *Opción Inválida*\n\
         ━━━━━━━━━━━━━━━━━━\n\n\
         Por favor selecciona una opción válida:\n\n\
         1️⃣ *Persona Física*\n\
         2️⃣ *Persona Moral*\n\
         3️⃣ *Persona Física (nombre completo)*\n\
         4️⃣ *Búsqueda Avanzada*{extra}\n\n\
         ━━━━━━━━━━━━━━━━━━\n\
         ↩️ Escribe *menu* para volver al inicio"
    )
}

pub fn ocr_not_entitled() -> String {
    "🔒 *Búsqueda por INE no habilitada*\n\n\
     Tu cuenta no tiene acceso a la búsqueda por credencial.\n\
     Contacta al administrador para habilitarla.\n\n\
     ↩️ Escribe *menu* para volver al inicio"
        .to_string()
}

pub fn lists_info() -> String {
    "📚 *Listas de Compliance Disponibles*\n\
     ━━━━━━━━━━━━━━━━━━\n\n\
     Tu búsqueda incluirá automáticamente:\n\n\
     👔 *PEP's* - Personas Expuestas Políticamente\n\
     🇲🇽 *SAT 69-B* - Operaciones inexistentes\n\
     🚫 *LPB* - Lista de Personas Bloqueadas\n\
     🇺🇸 *OFAC* - Office of Foreign Assets Control\n\
     🌐 *ONU* - Sanciones de Naciones Unidas\n\
     🔍 *INTERPOL* - Base de datos internacional\n\
     🕵️ *FBI* - Most Wanted List\n\
     _Y más listas de compliance..._\n\n\
     ━━━━━━━━━━━━━━━━━━\n\
     ✅ Búsqueda en *múltiples listas simultáneas*\n\
     ⚡ Resultados en *segundos*"
        .to_string()
}

pub fn name_prompt(kind: PersonKind, full_name_mode: bool, porcentaje: u8) -> String {
    let config = if porcentaje != DEFAULT_MATCH_PERCENTAGE {
        format!("\n*Configuración actual:*\n• 📊 Porcentaje: *{porcentaje}%*\n")
    } else {
        String::new()
    };
    match (kind, full_name_mode) {
        (PersonKind::Moral, _) => format!(
            "🏢 *Persona Moral Seleccionada*\n\
             ━━━━━━━━━━━━━━━━━━\n\n\
             📝 Escribe la *razón social completa* de la empresa:\n\n\
             *Ejemplo:* CONSTRUCTORA EJEMPLO SA DE CV\n{config}\n\
             ━━━━━━━━━━━━━━━━━━\n\
             ↩️ Para cancelar, escribe *menu*"
        ),
        (PersonKind::Fisica, true) => format!(
            "📝 *Nombre Completo*\n\
             ━━━━━━━━━━━━━━━━━━\n\n\
             Escribe el *nombre completo* de la persona en una sola línea:\n\n\
             *Ejemplo:* JUAN CARLOS GARCIA LOPEZ\n{config}\n\
             ━━━━━━━━━━━━━━━━━━\n\
             ↩️ Para cancelar, escribe *menu*"
        ),
        (PersonKind::Fisica, false) => format!(
            "👤 *Persona Física Seleccionada*\n\
             ━━━━━━━━━━━━━━━━━━\n\n\
             📝 Escribe el *nombre(s)* de la persona:\n\n\
             *Ejemplo:* JUAN CARLOS\n\
             💡 *Nota:* Solo el nombre, después te pediré los apellidos por separado.\n{config}\n\
             ━━━━━━━━━━━━━━━━━━\n\
             ↩️ Para cancelar, escribe *menu*"
        ),
    }
}

pub fn invalid_name() -> String {
    "❌ *Nombre Inválido*\n\
     ━━━━━━━━━━━━━━━━━━\n\n\
     El nombre debe tener al menos *2 caracteres*.\n\n\
     🔄 Por favor intenta nuevamente\n\n\
     ━━━━━━━━━━━━━━━━━━\n\
     ↩️ Para cancelar, escribe *menu*"
        .to_string()
}

pub fn apaterno_prompt() -> String {
    "📝 *Apellido Paterno*\n\
     ━━━━━━━━━━━━━━━━━━\n\n\
     Escribe el *apellido paterno*:\n\n\
     *Ejemplo:* GARCIA\n\n\
     ━━━━━━━━━━━━━━━━━━\n\
     💡 Si no tiene apellido paterno, escribe *skip*\n\
     ↩️ Para cancelar, escribe *menu*"
        .to_string()
}

pub fn amaterno_prompt() -> String {
    "📝 *Apellido Materno*\n\
     ━━━━━━━━━━━━━━━━━━\n\n\
     Finalmente, escribe el *apellido materno*:\n\n\
     *Ejemplo:* LOPEZ\n\n\
     ━━━━━━━━━━━━━━━━━━\n\
     💡 Si no tiene apellido materno, escribe *skip*\n\
     ↩️ Para cancelar, escribe *menu*"
        .to_string()
}

pub fn advanced_search_menu(porcentaje: u8) -> String {
    let recomendado = if porcentaje == DEFAULT_MATCH_PERCENTAGE {
        " (recomendado)"
    } else {
        ""
    };
    format!(
        "⚙️ *Búsqueda Avanzada*\n\
         ━━━━━━━━━━━━━━━━━━\n\n\
         Selecciona el tipo de configuración:\n\n\
         1️⃣ 👤 *Persona Física* (con opciones avanzadas)\n\
         2️⃣ 🏢 *Empresa* (con opciones avanzadas)\n\
         3️⃣ 📊 *Configurar Porcentaje de Coincidencia*\n      _Actual: {porcentaje}%{recomendado}_\n\n\
         ━━━━━━━━━━━━━━━━━━\n\
         💡 *Nota:* 98% reduce falsos positivos\n\
         ↩️ Escribe *menu* para volver"
    )
}

pub fn invalid_advanced_option() -> String {
    "❌ *Opción Inválida*\n\
     ━━━━━━━━━━━━━━━━━━\n\n\
     Selecciona una opción válida:\n\n\
     1️⃣ *Persona Física*\n\
     2️⃣ *Empresa*\n\
     3️⃣ *Configurar Porcentaje*\n\n\
     ━━━━━━━━━━━━━━━━━━\n\
     ↩️ Escribe *menu* para volver"
        .to_string()
}

pub fn percentage_prompt(porcentaje: u8) -> String {
    format!(
        "📊 *Configurar Porcentaje de Coincidencia*\n\
         ━━━━━━━━━━━━━━━━━━\n\n\
         *Porcentaje actual:* {porcentaje}%\n\n\
         Escribe el nuevo porcentaje (entre {MIN_MATCH_PERCENTAGE}% y {MAX_MATCH_PERCENTAGE}%):\n\n\
         *Recomendaciones:*\n\
         • 📈 *98%* - Recomendado (menos falsos positivos)\n\
         • 📊 *90%* - Balanceado\n\
         • 📉 *75%* - Más permisivo (más coincidencias)\n\n\
         ━━━━━━━━━━━━━━━━━━\n\
         💡 *Nota:* Mayor porcentaje = Mayor precisión\n\
         ↩️ Escribe *menu* para cancelar"
    )
}

pub fn invalid_percentage() -> String {
    format!(
        "❌ *Porcentaje Inválido*\n\
         ━━━━━━━━━━━━━━━━━━\n\n\
         Debe ser un número entre {MIN_MATCH_PERCENTAGE} y {MAX_MATCH_PERCENTAGE}.\n\n\
         *Ejemplos válidos:*\n• 98\n• 90\n• 75\n\n\
         ━━━━━━━━━━━━━━━━━━\n\
         🔄 Intenta nuevamente o escribe *menu* para cancelar"
    )
}

pub fn percentage_configured(porcentaje: u8) -> String {
    format!(
        "✅ *Porcentaje Configurado*\n\
         ━━━━━━━━━━━━━━━━━━\n\n\
         Nuevo porcentaje: *{porcentaje}%*\n\n\
         ⚙️ *Búsqueda Avanzada*\n\n\
         1️⃣ 👤 *Persona Física*\n\
         2️⃣ 🏢 *Empresa*\n\
         3️⃣ 📊 *Cambiar Porcentaje* _({porcentaje}%)_\n\n\
         ━━━━━━━━━━━━━━━━━━\n\
         ↩️ Escribe *menu* para volver al inicio"
    )
}

pub fn confirmation_message(draft: &SearchDraft) -> String {
    let datos = match draft.persona {
        _ if draft.full_name_mode => {
            format!("*Nombre Completo:* {}", draft.nombre.as_deref().unwrap_or(""))
        }
        PersonKind::Moral => format!("*Razón Social:* {}", draft.nombre.as_deref().unwrap_or("")),
        PersonKind::Fisica => format!(
            "*Nombre:* {}\n*Apellido Paterno:* {}\n*Apellido Materno:* {}",
            draft.nombre.as_deref().unwrap_or(""),
            draft.apaterno.as_deref().unwrap_or("N/A"),
            draft.amaterno.as_deref().unwrap_or("N/A")
        ),
    };
    let recomendado = if draft.porcentaje_min == DEFAULT_MATCH_PERCENTAGE {
        " _(recomendado)_"
    } else {
        ""
    };
    format!(
        "✅ *Confirmar Datos de Búsqueda*\n\
         ━━━━━━━━━━━━━━━━━━\n\n\
         *Tipo:* {}\n\n\
         {datos}\n\n\
         *Configuración:*\n\
         • 📊 Porcentaje coincidencia: *{}%*{recomendado}\n\
         • 📋 Listas a consultar: *Todas las disponibles*\n\
         • ⏱️ Tiempo estimado: *Pocos segundos*",
        draft.persona.label(),
        draft.porcentaje_min
    )
}

pub fn processing_status() -> String {
    "🔄 *Procesando búsqueda...*\n\n\
     ⏳ Consultando bases de datos...\n\
     ━━━━━━━━━━━━━━━━━━\n\
     *Listas:* PEP's, SAT 69-B, LPB, OFAC, ONU, INTERPOL, FBI y más\n\n\
     _Por favor espera, no envíes mensajes..._"
        .to_string()
}

pub fn still_processing() -> String {
    "⏳ *Tu búsqueda sigue en proceso*\n\n\
     Por favor espera un momento, te enviaré los resultados en cuanto estén listos.\n\n\
     _No es necesario enviar más mensajes._"
        .to_string()
}

pub fn results_message(result: &KycSearchResponse, report_id: &str) -> String {
    let has_matches = result.coincidences > 0;
    let status_emoji = if has_matches { "⚠️" } else { "✅" };
    let status_text = if has_matches {
        "COINCIDENCIAS ENCONTRADAS"
    } else {
        "SIN COINCIDENCIAS"
    };
    let search_time = result
        .performance
        .as_ref()
        .and_then(|p| p.processing_time_ms)
        .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
        .unwrap_or_else(|| "3.2s".to_string());

    let mut match_details = String::new();
    if has_matches {
        match_details.push_str("\n*📊 Detalle de Coincidencias:*\n");
        if result.person.is_empty() {
            match_details.push_str("• Ver PDF para detalles completos\n");
        } else {
            for m in result.person.iter().take(3) {
                match_details.push_str(&format!(
                    "• {} ({}): {:.0}% coincidencia\n",
                    m.nombre, m.tipo, m.porcentaje_coincidencia
                ));
            }
        }
    }

    format!(
        "{status_emoji} *Resultados de Búsqueda KYC*\n\
         ━━━━━━━━━━━━━━━━━━\n\n\
         *Estado:* {status_text}\n\
         *Coincidencias:* {}\n\
         *Listas consultadas:* Todas las disponibles\n\
         *Tiempo de búsqueda:* {search_time}\n\
         {match_details}\n\
         *📄 Reporte*\n\
         • Validez: 24 horas\n\
         • ID: {report_id}\n\n\
         ━━━━━━━━━━━━━━━━━━\n\
         ¿Qué deseas hacer?\n\n\
         1️⃣ 🔎 *Nueva Búsqueda*\n\
         3️⃣ ℹ️ *Ayuda y Soporte*\n\n\
         ↩️ Escribe *menu* para ver el menú principal",
        result.coincidences
    )
}

pub fn pdf_ready_message(url: &str) -> String {
    format!(
        "📄 *Reporte PDF Generado*\n\
         ━━━━━━━━━━━━━━━━━━\n\n\
         {url}\n\n\
         *📋 Contenido del reporte:*\n\
         • ✅ Datos consultados\n\
         • 📊 Resultados de búsqueda\n\
         • 📝 Detalles de coincidencias\n\
         • 🕐 Fecha y hora de consulta\n\n\
         ━━━━━━━━━━━━━━━━━━\n\
         ⏰ _El archivo estará disponible por 24 horas_"
    )
}

pub fn pdf_failed_message() -> String {
    "❌ Error al procesar el PDF, pero la consulta fue exitosa.".to_string()
}

pub fn api_error_message() -> String {
    "⚠️ *Servicio Temporalmente No Disponible*\n\
     ━━━━━━━━━━━━━━━━━━\n\n\
     Estamos experimentando problemas técnicos.\n\n\
     💡 *Sugerencia:*\n\
     _Intenta de nuevo en 5 minutos._\n\n\
     ━━━━━━━━━━━━━━━━━━\n\
     ↩️ Escribe *menu* para volver al inicio"
        .to_string()
}

pub fn internal_error_message() -> String {
    "❌ Ocurrió un error interno. Por favor intenta nuevamente o escribe *menu* para volver al inicio."
        .to_string()
}

pub fn quota_exceeded_message(current: i64, max: i64) -> String {
    format!(
        "🚫 *Límite Diario Alcanzado*\n\
         ━━━━━━━━━━━━━━━━━━\n\n\
         Has utilizado *{current}* de *{max}* búsquedas permitidas hoy.\n\n\
         ⏰ Tu límite se restablece a la *medianoche* (hora local).\n\n\
         ━━━━━━━━━━━━━━━━━━\n\
         💡 Si necesitas más búsquedas, contacta al administrador."
    )
}

pub fn recent_searches_stub() -> String {
    "📋 *Búsquedas Recientes*\n\
     ━━━━━━━━━━━━━━━━━━\n\n\
     No tienes búsquedas recientes.\n\n\
     ━━━━━━━━━━━━━━━━━━\n\
     1️⃣ 🔎 *Nueva Búsqueda*\n\
     ↩️ Escribe *menu* para el menú principal"
        .to_string()
}

pub fn ine_front_prompt() -> String {
    "🪪 *Búsqueda por INE*\n\
     ━━━━━━━━━━━━━━━━━━\n\n\
     📸 Envía una *foto del frente* de la credencial INE.\n\n\
     *Recomendaciones:*\n\
     • Buena iluminación\n\
     • Credencial completa en la imagen\n\
     • Sin reflejos\n\n\
     ━━━━━━━━━━━━━━━━━━\n\
     ↩️ Para cancelar, escribe *menu*"
        .to_string()
}

pub fn ine_back_prompt() -> String {
    "✅ *Frente recibido*\n\
     ━━━━━━━━━━━━━━━━━━\n\n\
     📸 Ahora envía la *foto del reverso* de la credencial.\n\n\
     ━━━━━━━━━━━━━━━━━━\n\
     ↩️ Para cancelar, escribe *menu*"
        .to_string()
}

pub fn ine_not_image() -> String {
    "❌ *Imagen no válida*\n\n\
     Necesito una *fotografía* de la credencial (JPG o PNG).\n\
     Por favor envía la imagen como foto adjunta.\n\n\
     ↩️ Para cancelar, escribe *menu*"
        .to_string()
}

pub fn ocr_processing() -> String {
    "🔍 *Procesando credencial...*\n\n\
     ⏳ Extrayendo datos de las imágenes.\n\
     _Esto toma unos segundos, por favor espera..._"
        .to_string()
}

pub fn ocr_extracted(name: &str) -> String {
    format!(
        "✅ *Datos extraídos de la credencial*\n\
         ━━━━━━━━━━━━━━━━━━\n\n\
         *Nombre detectado:* {name}\n\n\
         Iniciando búsqueda en listas..."
    )
}

pub fn ine_error_retry_menu() -> String {
    "❌ *No pude leer la credencial*\n\
     ━━━━━━━━━━━━━━━━━━\n\n\
     Las imágenes no pudieron procesarse.\n\n\
     ¿Qué deseas hacer?\n\n\
     1️⃣ 🔄 *Reintentar* (enviar fotos de nuevo)\n\
     2️⃣ 🏠 *Menú Principal*\n\n\
     ━━━━━━━━━━━━━━━━━━\n\
     ↩️ También puedes escribir *menu*"
        .to_string()
}

pub fn help_menu() -> String {
    "ℹ️ *Centro de Ayuda*\n\
     ━━━━━━━━━━━━━━━━━━\n\n\
     *PREGUNTAS FRECUENTES*\n\n\
     1️⃣ 📋 *Sobre las Listas*\n\
     2️⃣ 🔍 *Cómo Buscar*\n\
     3️⃣ 📊 *Interpretar Resultados*\n\n\
     *SOPORTE TÉCNICO*\n\n\
     4️⃣ 💬 *Chat con Soporte*\n\
     5️⃣ 📧 *Enviar Email*\n\
     6️⃣ 📞 *Llamar*\n\n\
     *INFORMACIÓN*\n\n\
     7️⃣ 📖 *Manual de Usuario*\n\
     8️⃣ 🔐 *Política de Privacidad*\n\
     9️⃣ ℹ️ *Versión del Sistema*\n\n\
     ━━━━━━━━━━━━━━━━━━\n\
     ↩️ Escribe *0* para volver"
        .to_string()
}

pub fn help_topic(option: &str) -> Option<String> {
    let body = match option {
        "1" => {
            "📋 *Sobre las Listas de KYC*\n\
             ━━━━━━━━━━━━━━━━━━\n\n\
             Nuestro sistema consulta múltiples listas oficiales:\n\n\
             👔 *PEP's* - Personas Expuestas Políticamente\n\
             🇲🇽 *SAT 69-B* - Lista de operaciones inexistentes\n\
             🚫 *LPB* - Lista de Personas Bloqueadas\n\
             🇺🇸 *OFAC* - Office of Foreign Assets Control\n\
             🌐 *ONU* - Sanciones de Naciones Unidas\n\
             🔍 *INTERPOL* - Base de datos internacional\n\
             🕵️ *FBI* - Most Wanted List\n\
             _Y más listas de compliance..._\n\n\
             📊 *Porcentaje recomendado:* 98%"
        }
        "2" => {
            "🔍 *Cómo Realizar Búsquedas*\n\
             ━━━━━━━━━━━━━━━━━━\n\n\
             1️⃣ Selecciona *\"Buscar en Listas\"*\n\
             2️⃣ Elige tipo: *Persona Física* o *Empresa*\n\
             3️⃣ Ingresa los datos solicitados\n\
             4️⃣ Espera los resultados (pocos segundos)\n\
             5️⃣ Descarga el reporte PDF\n\n\
             💡 *Tips:* usa nombres completos y exactos,\n\
             verifica la ortografía antes de enviar."
        }
        "3" => {
            "📊 *Interpretar Resultados*\n\
             ━━━━━━━━━━━━━━━━━━\n\n\
             ✅ *SIN COINCIDENCIAS*\n\
             No aparece en las listas restrictivas.\n\n\
             ⚠️ *CON COINCIDENCIAS*\n\
             Se encontraron registros similares.\n\n\
             *Porcentajes de similitud:*\n\
             • *98-100%* - Coincidencia muy alta\n\
             • *90-97%* - Coincidencia alta\n\
             • *75-89%* - Puede ser falso positivo"
        }
        "4" => {
            "💬 *Chat con Soporte*\n\
             ━━━━━━━━━━━━━━━━━━\n\n\
             *Horarios:* Lunes a Viernes 9:00-18:00, Sábados 10:00-14:00\n\n\
             📧 Email: hola@kyc-systems.com\n\
             📞 Teléfono: +52 55 4762 6178\n\
             💬 WhatsApp: Este mismo chat"
        }
        "5" => {
            "📧 *Enviar Email*\n\
             ━━━━━━━━━━━━━━━━━━\n\n\
             ✉️ *Dirección:* hola@kyc-systems.com\n\n\
             Incluye tu nombre, empresa y número registrado.\n\
             ⏱️ *Tiempo de respuesta:* máximo 4 horas"
        }
        "6" => {
            "📞 *Soporte Telefónico*\n\
             ━━━━━━━━━━━━━━━━━━\n\n\
             *Número:* +52 55 4762 6178\n\
             *Horarios:* Lunes a Viernes 9:00-18:00 (CDMX)\n\n\
             Ten a la mano tu nombre, empresa y número registrado."
        }
        "7" | "8" | "9" => {
            "ℹ️ *Información del Sistema*\n\
             ━━━━━━━━━━━━━━━━━━\n\n\
             *Sistema KYC-LISTAS*\n\n\
             ✅ Consulta en múltiples listas oficiales\n\
             ✅ Generación de reportes PDF\n\
             ✅ Porcentajes de coincidencia configurables\n\n\
             *Privacidad:* datos encriptados en tránsito,\n\
             reportes disponibles por 24 horas únicamente."
        }
        _ => return None,
    };
    Some(format!(
        "{body}\n\n━━━━━━━━━━━━━━━━━━\n↩️ Escribe *0* para volver al menú de ayuda"
    ))
}

pub fn help_invalid_option() -> String {
    format!(
        "❌ *Opción no válida en ayuda*\n\n{}",
        help_menu()
    )
}
